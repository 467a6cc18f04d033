// Copyright (c) 2025 Syswonder
// hvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//     http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND, EITHER
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT, MERCHANTABILITY OR
// FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.
//
// Syswonder Website:
//      https://www.syswonder.org
//
// Authors:
//
use core::fmt::{self, Write};

use log::{self, Level, LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

use crate::error::HvResult;

/// Byte sink of the platform console (usually a UART `putchar`).
pub type ConsolePutchar = fn(u8);

static PRINT_LOCK: Mutex<()> = Mutex::new(());
static CONSOLE: Once<ConsolePutchar> = Once::new();

struct Stdout;

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let putchar = match CONSOLE.get() {
            Some(putchar) => *putchar,
            None => return Ok(()),
        };
        for c in s.bytes() {
            match c {
                b'\n' => {
                    putchar(b'\r');
                    putchar(b'\n');
                }
                _ => putchar(c),
            }
        }
        Ok(())
    }
}

pub fn print(args: fmt::Arguments) {
    let _locked = PRINT_LOCK.lock();
    let _ = Stdout.write_fmt(args);
}

/// print without line breaks
#[macro_export]
macro_rules! print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::logging::print(format_args!($fmt $(, $($arg)+)?));
    }
}

/// print with line breaks
#[macro_export]
macro_rules! println {
    () => { $crate::print!("\n") };
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::logging::print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?));
    }
}

macro_rules! with_color {
    ($color_code:expr, $($arg:tt)*) => {{
        format_args!("\u{1B}[{}m{}\u{1B}[m", $color_code as u8, format_args!($($arg)*))
    }};
}

#[repr(u8)]
#[allow(dead_code)]
enum ColorCode {
    Black = 30,
    Red = 31,
    Green = 32,
    Yellow = 33,
    Blue = 34,
    Magenta = 35,
    Cyan = 36,
    White = 37,
    BrightBlack = 90,
    BrightRed = 91,
    BrightGreen = 92,
    BrightYellow = 93,
    BrightBlue = 94,
    BrightMagenta = 95,
    BrightCyan = 96,
    BrightWhite = 97,
}

/// Log level selected at build time through the `LOG` environment variable.
pub fn max_level() -> LevelFilter {
    level_from_str(option_env!("LOG"))
}

fn level_from_str(level: Option<&str>) -> LevelFilter {
    match level {
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// Install the console sink and the logger. Fails if a logger is already set.
pub fn init(putchar: ConsolePutchar) -> HvResult {
    static LOGGER: SimpleLogger = SimpleLogger;
    CONSOLE.call_once(|| putchar);
    log::set_logger(&LOGGER).map_err(|_| hv_err!(EBUSY, "logger already initialized"))?;
    log::set_max_level(max_level());
    Ok(())
}

struct SimpleLogger;

impl SimpleLogger {
    fn print(
        &self,
        level: Level,
        line: u32,
        target: &str,
        level_color: ColorCode,
        args_color: ColorCode,
        record: &Record,
    ) {
        print(with_color!(
            ColorCode::White,
            "[{}] {} {}\n",
            with_color!(level_color, "{:<5}", level),
            with_color!(ColorCode::White, "({}:{})", target, line),
            with_color!(args_color, "{}", record.args()),
        ));
    }
}

impl Log for SimpleLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let line = record.line().unwrap_or(0);
        let target = record.target();
        let level_color = match level {
            Level::Error => ColorCode::BrightRed,
            Level::Warn => ColorCode::BrightYellow,
            Level::Info => ColorCode::BrightGreen,
            Level::Debug => ColorCode::BrightCyan,
            Level::Trace => ColorCode::BrightBlack,
        };
        let args_color = match level {
            Level::Error => ColorCode::Red,
            Level::Warn => ColorCode::Yellow,
            Level::Info => ColorCode::Green,
            Level::Debug => ColorCode::Cyan,
            Level::Trace => ColorCode::BrightBlack,
        };

        self.print(level, line, target, level_color, args_color, record);
    }

    fn flush(&self) {}
}
