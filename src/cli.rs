//! Code related to CLI things
//!

use clap::Parser;

#[derive(Parser)]
#[command(arg_required_else_help(false))]
/// Bridge between an IOP node manager speaking JAUS over UDP and JSON
/// WebSocket clients.
pub struct Cli {
    #[clap(short = 'p', long, help = "WebSocket listen port")]
    pub ws_port: Option<u16>,
    #[clap(
        short = 'u',
        long,
        help = "IOP node manager URI, eg udp://192.168.0.10:3794"
    )]
    pub iop_uri: Option<String>,
    #[clap(short, long, help = "Configuration file")]
    pub config: Option<String>,
    #[clap(short, long, help = "Directory with JSON message schemas")]
    pub schemes: Option<String>,
    #[clap(
        short = 'm',
        long = "log-message",
        help = "Only log traffic with these message ids (hex, repeatable)"
    )]
    pub log_messages: Vec<String>,
    #[clap(short, long)]
    pub debug: bool,
}
