//! A `pretty_env_logger` format that prefixes every line with this process's
//! rank, the way the teacher's `log_helper` prefixes lines with the owning
//! partition's name.
use std::io::{Result, Write};

use pretty_env_logger::env_logger::fmt::{Color, Formatter};

use crate::rank::RANK_ENV;

pub fn format(f: &mut Formatter, record: &log::Record) -> Result<()> {
    let mut style = f.style();
    let rank = std::env::var(RANK_ENV).unwrap_or_else(|_| "?".into());
    let rank = style.set_bold(true).value(rank);

    let mut style = f.style();
    let level = colored_level(&mut style, record.level());

    writeln!(f, "{level} rank={rank} {} > {}", record.target(), record.args())
}

fn colored_level<'a>(
    style: &'a mut pretty_env_logger::env_logger::fmt::Style,
    level: log::Level,
) -> pretty_env_logger::env_logger::fmt::StyledValue<'a, &'static str> {
    match level {
        log::Level::Trace => style.set_color(Color::Magenta).value("TRACE"),
        log::Level::Debug => style.set_color(Color::Blue).value("DEBUG"),
        log::Level::Info => style.set_color(Color::Green).value("INFO "),
        log::Level::Warn => style.set_color(Color::Yellow).value("WARN "),
        log::Level::Error => style.set_color(Color::Red).value("ERROR"),
    }
}
