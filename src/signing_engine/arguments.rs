//! Command line construction for `ssh-keygen`.
//!
//! Arguments are an ordered list of `(flag, value)` pairs. `ssh-keygen` cares about both
//! the order and the repetition of flags, so the expansion rules are strict:
//!
//! * `Switch(true)` emits the flag alone, `Switch(false)` emits nothing,
//! * `Repeated` emits the flag once per element,
//! * `Value` emits the flag followed by the value,
//! * pairs without a flag are positional and emit their value(s) only.
use std::ffi::{OsStr, OsString};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Switch(bool),
    Value(OsString),
    Repeated(Vec<OsString>),
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Switch(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Value(value.into())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Value(value.into())
    }
}

impl From<&Path> for ArgValue {
    fn from(value: &Path) -> Self {
        ArgValue::Value(value.as_os_str().to_os_string())
    }
}

impl From<u64> for ArgValue {
    fn from(value: u64) -> Self {
        ArgValue::Value(value.to_string().into())
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(values: Vec<String>) -> Self {
        ArgValue::Repeated(values.into_iter().map(OsString::from).collect())
    }
}

/// Ordered argument list.
#[derive(Debug, Default, Clone)]
pub struct Arguments {
    pairs: Vec<(Option<&'static str>, ArgValue)>,
}

impl Arguments {
    pub fn new() -> Self {
        Arguments::default()
    }

    pub fn flag(mut self, flag: &'static str, value: impl Into<ArgValue>) -> Self {
        self.pairs.push((Some(flag), value.into()));
        self
    }

    /// A flag that never takes a value.
    pub fn switch(self, flag: &'static str) -> Self {
        self.flag(flag, true)
    }

    pub fn positional(mut self, value: impl Into<ArgValue>) -> Self {
        self.pairs.push((None, value.into()));
        self
    }

    pub fn build(&self) -> Vec<OsString> {
        let mut list = Vec::new();
        for (flag, value) in &self.pairs {
            match value {
                ArgValue::Switch(false) => {}
                ArgValue::Switch(true) => {
                    if let Some(flag) = flag {
                        list.push(OsString::from(flag));
                    }
                }
                ArgValue::Value(value) => push_pair(&mut list, *flag, value),
                ArgValue::Repeated(values) => {
                    for value in values {
                        push_pair(&mut list, *flag, value);
                    }
                }
            }
        }
        list
    }
}

fn push_pair(list: &mut Vec<OsString>, flag: Option<&str>, value: &OsStr) {
    if let Some(flag) = flag {
        list.push(OsString::from(flag));
    }
    list.push(value.to_os_string());
}
