// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use clap::Parser;
use log::LevelFilter;
use std::net::{IpAddr, Ipv4Addr};

/// Server options, to be specified as arguments.
#[derive(Debug, Parser)]
pub struct Options {
    /// Address to bind.
    #[clap(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,
    /// HTTP (and WebSocket) port.
    #[clap(long, default_value = "8080")]
    pub http_port: u16,
    /// Secret that marks a bot official when its attach carries it.
    /// Without one, no bot can be official and the eval bar has no
    /// provider for human-vs-human games.
    #[clap(long)]
    pub official_bot_secret: Option<String>,
    /// Maximum simultaneously attached bot clients.
    #[clap(long, default_value = "10")]
    pub max_bot_clients: usize,
    /// Log incoming HTTP requests.
    #[cfg_attr(debug_assertions, clap(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), clap(long, default_value = "warn"))]
    pub debug_http: LevelFilter,
    /// Log game/session diagnostics.
    #[cfg_attr(debug_assertions, clap(long, default_value = "info"))]
    #[cfg_attr(not(debug_assertions), clap(long, default_value = "warn"))]
    pub debug_game: LevelFilter,
    /// Log bot protocol diagnostics.
    #[cfg_attr(debug_assertions, clap(long, default_value = "debug"))]
    #[cfg_attr(not(debug_assertions), clap(long, default_value = "warn"))]
    pub debug_bots: LevelFilter,
}

impl Options {
    pub fn official_secret(&self) -> Option<&str> {
        self.official_bot_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
    }
}
