//! # Requests
//!
//! Purpose: Represent one outgoing command as an ordered list of binary-safe
//! arguments, built once and never mutated after it is queued.
//!
//! ## Design Principles
//! 1. **Builder Pattern**: `Request::cmd("SET").arg(key).arg(value)`.
//! 2. **Binary-Safe**: Arguments are `Bytes`; nothing is escaped.
//! 3. **Readable Logs**: `Display` renders a short human form for tracing.

use std::fmt;

use bytes::Bytes;

/// Maximum number of arguments rendered by `Display`.
const DISPLAY_MAX_ARGS: usize = 10;

/// Arguments shorter than this may be rendered inline by `Display`.
const DISPLAY_INLINE_LEN: usize = 20;

/// A command name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    args: Vec<Bytes>,
}

impl Request {
    /// Starts a request with the given command name.
    pub fn cmd(name: impl IntoArg) -> Self {
        Request {
            args: vec![name.into_arg()],
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl IntoArg) -> Self {
        self.args.push(arg.into_arg());
        self
    }

    /// Appends every argument of an iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.args.extend(args.into_iter().map(IntoArg::into_arg));
        self
    }

    /// Command name (first argument), empty for an empty request.
    pub fn name(&self) -> &[u8] {
        self.args.first().map(|arg| &arg[..]).unwrap_or(&[])
    }

    /// All arguments including the command name.
    pub fn as_args(&self) -> &[Bytes] {
        &self.args
    }

    /// Number of arguments including the command name.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when the request carries no arguments at all.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut args = self.args.iter();
        match args.next() {
            Some(name) => f.write_str(&String::from_utf8_lossy(name))?,
            None => return Ok(()),
        }

        let rest = self.args.len() - 1;
        for arg in args.take(DISPLAY_MAX_ARGS) {
            f.write_str(" ")?;
            write_arg(f, arg)?;
        }
        if rest > DISPLAY_MAX_ARGS {
            write!(f, " ... of {} args", rest)?;
        }
        Ok(())
    }
}

fn write_arg(f: &mut fmt::Formatter<'_>, arg: &[u8]) -> fmt::Result {
    if arg.is_empty() {
        return f.write_str("\"\"");
    }
    if arg.len() < DISPLAY_INLINE_LEN {
        if let Ok(text) = std::str::from_utf8(arg) {
            if text.chars().all(char::is_alphanumeric) {
                return f.write_str(text);
            }
            return write!(f, "{:?}", text);
        }
    }
    write!(f, "[{} bytes]", arg.len())
}

/// Conversion into a single request argument.
///
/// Numbers are sent in their decimal text form, which is what the server
/// parses for counters, TTLs and scores.
pub trait IntoArg {
    fn into_arg(self) -> Bytes;
}

impl IntoArg for Bytes {
    fn into_arg(self) -> Bytes {
        self
    }
}

impl IntoArg for &Bytes {
    fn into_arg(self) -> Bytes {
        self.clone()
    }
}

impl IntoArg for Vec<u8> {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &[u8] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> IntoArg for &[u8; N] {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl IntoArg for String {
    fn into_arg(self) -> Bytes {
        Bytes::from(self)
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl IntoArg for &str {
    fn into_arg(self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

macro_rules! int_arg {
    ($($ty:ty),*) => {
        $(
            impl IntoArg for $ty {
                fn into_arg(self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

int_arg!(i32, i64, u32, u64, usize, isize);

impl IntoArg for f64 {
    fn into_arg(self) -> Bytes {
        Bytes::from(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_arguments_in_order() {
        let req = Request::cmd("SET").arg("key").arg(b"value").arg(10u64);
        let args: Vec<&[u8]> = req.as_args().iter().map(|a| &a[..]).collect();
        assert_eq!(args, vec![&b"SET"[..], b"key", b"value", b"10"]);
        assert_eq!(req.name(), b"SET");
    }

    #[test]
    fn display_is_human_readable() {
        let req = Request::cmd("SET")
            .arg("counter")
            .arg("")
            .arg("two words")
            .arg(vec![0xffu8, 0xfe])
            .arg(vec![b'x'; 64]);
        assert_eq!(
            req.to_string(),
            "SET counter \"\" \"two words\" [2 bytes] [64 bytes]"
        );
    }

    #[test]
    fn display_truncates_long_argument_lists() {
        let req = Request::cmd("DEL").args((0..12).map(|i| format!("k{}", i)));
        assert_eq!(
            req.to_string(),
            "DEL k0 k1 k2 k3 k4 k5 k6 k7 k8 k9 ... of 12 args"
        );
    }
}
