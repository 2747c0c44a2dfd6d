// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "robosup",
    about = "Real-time supervisor bridging an LLM/TTS/STT backend to a wheeled robot",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (overrides the default search path).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective configuration and exit.
    ShowConfig,
}
