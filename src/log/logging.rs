// module logging

use chrono::Local;

// log level ordering is significant (info < debug < trace)
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum Level {
    INFO,
    DEBUG,
    TRACE,
}

#[derive(Clone, Copy, Debug)]
pub struct Logging {
    pub log_level: Level,
}

impl Logging {
    fn timestamp(&self) -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn info(&self, msg: &str) {
        println!("{} : [ \x1b[1;94mINFO\x1b[0m ] {}", self.timestamp(), msg);
    }

    // highlighted variants - used for phase banners
    pub fn hi(&self, msg: &str) {
        println!(
            "{} : [ \x1b[1;95mINFO\x1b[0m ] \x1b[1;95m{}\x1b[0m",
            self.timestamp(),
            msg
        );
    }

    pub fn mid(&self, msg: &str) {
        println!(
            "{} : [ \x1b[1;96mINFO\x1b[0m ] \x1b[1;96m{}\x1b[0m",
            self.timestamp(),
            msg
        );
    }

    pub fn lo(&self, msg: &str) {
        println!(
            "{} : [ \x1b[1;92mINFO\x1b[0m ] \x1b[1;92m{}\x1b[0m",
            self.timestamp(),
            msg
        );
    }

    pub fn debug(&self, msg: &str) {
        if self.log_level >= Level::DEBUG {
            println!("{} : [ \x1b[1;92mDEBUG\x1b[0m ] {}", self.timestamp(), msg);
        }
    }

    pub fn trace(&self, msg: &str) {
        if self.log_level >= Level::TRACE {
            println!("{} : [ \x1b[1;96mTRACE\x1b[0m ] {}", self.timestamp(), msg);
        }
    }

    pub fn warn(&self, msg: &str) {
        println!("{} : [ \x1b[1;93mWARN\x1b[0m ] {}", self.timestamp(), msg);
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{} : [ \x1b[1;91mERROR\x1b[0m ] {}", self.timestamp(), msg);
    }
}
