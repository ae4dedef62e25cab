// SPDX-FileCopyrightText: 2024 Wall Game authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use super::Options;
use log::{LevelFilter, Log};
use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::{stderr, Write as _};

impl Options {
    pub fn init_logger(&self) {
        log::set_boxed_logger(Box::new(Logger {
            http: self.debug_http,
            game: self.debug_game,
            bots: self.debug_bots,
        }))
        .expect("failed to init logger");
        log::set_max_level(self.debug_http.max(self.debug_game).max(self.debug_bots));
    }
}

struct Logger {
    http: LevelFilter,
    game: LevelFilter,
    bots: LevelFilter,
}

impl Logger {
    fn filter(&self, target: &str) -> LevelFilter {
        if target.starts_with("wallgame_server::net") || target.starts_with("wallgame_server::socket")
        {
            self.http
        } else if target.starts_with("wallgame_server::actor::bot")
            || target.starts_with("wallgame_server::actor::eval")
            || target.starts_with("wallgame_server::service::bgs")
            || target.starts_with("wallgame_server::service::bot")
        {
            self.bots
        } else {
            self.game
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter(metadata.target()) >= metadata.level()
    }

    fn flush(&self) {
        // No-op
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        thread_local! {
            static BUFFER: RefCell<String> = const { RefCell::new(String::new()) };
        }
        BUFFER.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            writeln!(
                &mut *buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
            .unwrap();
            let result = stderr().lock().write_all(buf.as_bytes());
            if cfg!(debug_assertions) {
                result.unwrap();
            }
        });
    }
}
