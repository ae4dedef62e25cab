// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use actix::Actor;
use clap::Parser;
use log::{error, info};
use wallgame_server::actor::{CoreConfig, ServerActor};
use wallgame_server::cli::Options;
use wallgame_server::net::new_router;
use wallgame_server::service::LogPersister;
use wallgame_server::shutdown::Drain;

#[actix::main]
async fn main() {
    let options = Options::parse();
    options.init_logger();

    let config = CoreConfig {
        official_secret: options.official_secret().map(str::to_owned),
        max_bot_clients: options.max_bot_clients,
        server_info: CoreConfig::server_info(),
    };
    let server = ServerActor::new(config, Box::new(LogPersister)).start();
    let app = new_router(server.clone());

    let bind = (options.bind_address, options.http_port);
    let listener = match tokio::net::TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("could not bind {}:{}: {err}", bind.0, bind.1);
            return;
        }
    };
    info!("listening on {}:{}", bind.0, bind.1);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                error!("server error: {err}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }

    let _ = server.send(Drain).await;
}
