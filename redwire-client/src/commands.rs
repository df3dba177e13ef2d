//! # Command Builders
//!
//! Purpose: Hand-written shortcuts for common commands and the reply
//! shaping they need. Anything not listed here goes through
//! `Session::call`.

use redwire_common::{IntoArg, Reply, Request};

use crate::error::{ClientResult, Error};
use crate::handler::Handler;
use crate::session::Session;
use crate::value::{key_text, Value};

impl Session {
    /// PING; checks for PONG and produces no result.
    pub fn ping(&mut self) -> &mut Self {
        self.queue(Request::cmd("PING"), Handler::Expect("PONG"))
    }

    pub fn echo(&mut self, message: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("ECHO").arg(message), Handler::Raw)
    }

    /// SET a value for key. The `OK` status is reported as a result.
    pub fn set(&mut self, key: impl IntoArg, value: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("SET").arg(key).arg(value), Handler::Raw)
    }

    /// SET with extra options such as `EX 10` or `NX`.
    pub fn set_with<I, A>(&mut self, key: impl IntoArg, value: impl IntoArg, options: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let request = Request::cmd("SET").arg(key).arg(value).args(options);
        self.queue(request, Handler::Raw)
    }

    pub fn get(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("GET").arg(key), Handler::Raw)
    }

    pub fn mget<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("MGET").args(keys), Handler::Raw)
    }

    pub fn incr(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("INCR").arg(key), Handler::Raw)
    }

    pub fn incrby(&mut self, key: impl IntoArg, delta: i64) -> &mut Self {
        self.queue(Request::cmd("INCRBY").arg(key).arg(delta), Handler::Raw)
    }

    pub fn decr(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("DECR").arg(key), Handler::Raw)
    }

    /// DEL; the result is the number of keys removed.
    pub fn delete<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("DEL").args(keys), Handler::Raw)
    }

    pub fn exists<I, A>(&mut self, keys: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("EXISTS").args(keys), Handler::Raw)
    }

    /// Sets a key expiration in seconds, with millisecond precision (PEXPIRE).
    pub fn expire(&mut self, key: impl IntoArg, seconds: f64) -> &mut Self {
        let millis = (seconds * 1000.0).round() as i64;
        self.queue(
            Request::cmd("PEXPIRE").arg(key).arg(millis),
            Handler::transform(integer_to_bool),
        )
    }

    /// Remaining time to live in seconds (PTTL, millisecond precision).
    ///
    /// Negative server codes (-1 no expiry, -2 missing key) are kept as is.
    pub fn ttl(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(
            Request::cmd("PTTL").arg(key),
            Handler::transform(|reply| match reply {
                Reply::Integer(ms) if ms < 0 => Ok(Value::Int(ms)),
                Reply::Integer(ms) => Ok(Value::Float(ms as f64 / 1000.0)),
                other => Err(Error::unexpected("integer", other)),
            }),
        )
    }

    /// Keys matching `pattern`, as text.
    pub fn keys(&mut self, pattern: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("KEYS").arg(pattern), Handler::transform(list_of_keys))
    }

    /// HSET with field/value pairs; the result is the number of new fields.
    pub fn hset<I, F, V>(&mut self, key: impl IntoArg, pairs: I) -> &mut Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: IntoArg,
        V: IntoArg,
    {
        let mut request = Request::cmd("HSET").arg(key);
        for (field, value) in pairs {
            request = request.arg(field).arg(value);
        }
        self.queue(request, Handler::Raw)
    }

    pub fn hget(&mut self, key: impl IntoArg, field: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("HGET").arg(key).arg(field), Handler::Raw)
    }

    pub fn hmget<I, A>(&mut self, key: impl IntoArg, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("HMGET").arg(key).args(fields), Handler::Raw)
    }

    /// All fields of a hash as a `Value::Map` keyed by text.
    pub fn hgetall(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("HGETALL").arg(key), Handler::transform(list_to_map))
    }

    pub fn hdel<I, A>(&mut self, key: impl IntoArg, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("HDEL").arg(key).args(fields), Handler::Raw)
    }

    pub fn hexists(&mut self, key: impl IntoArg, field: impl IntoArg) -> &mut Self {
        self.queue(
            Request::cmd("HEXISTS").arg(key).arg(field),
            Handler::transform(integer_to_bool),
        )
    }

    pub fn hkeys(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("HKEYS").arg(key), Handler::transform(list_of_keys))
    }

    pub fn hvals(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("HVALS").arg(key), Handler::Raw)
    }

    pub fn hlen(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("HLEN").arg(key), Handler::Raw)
    }

    pub fn lpush<I, A>(&mut self, key: impl IntoArg, values: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("LPUSH").arg(key).args(values), Handler::Raw)
    }

    pub fn rpush<I, A>(&mut self, key: impl IntoArg, values: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("RPUSH").arg(key).args(values), Handler::Raw)
    }

    pub fn lrange(&mut self, key: impl IntoArg, start: i64, stop: i64) -> &mut Self {
        self.queue(
            Request::cmd("LRANGE").arg(key).arg(start).arg(stop),
            Handler::Raw,
        )
    }

    pub fn sadd<I, A>(&mut self, key: impl IntoArg, members: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.queue(Request::cmd("SADD").arg(key).args(members), Handler::Raw)
    }

    pub fn smembers(&mut self, key: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("SMEMBERS").arg(key), Handler::Raw)
    }

    /// PUBLISH; the result is the number of receiving subscribers.
    pub fn publish(&mut self, channel: impl IntoArg, message: impl IntoArg) -> &mut Self {
        self.queue(Request::cmd("PUBLISH").arg(channel).arg(message), Handler::Raw)
    }

    pub fn flushdb(&mut self) -> &mut Self {
        self.queue(Request::cmd("FLUSHDB"), Handler::Expect("OK"))
    }
}

fn integer_to_bool(reply: Reply) -> ClientResult<Value> {
    match reply {
        Reply::Integer(value) => Ok(Value::Bool(value != 0)),
        other => Err(Error::unexpected("integer", other)),
    }
}

fn list_of_keys(reply: Reply) -> ClientResult<Value> {
    match reply {
        Reply::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(Some(data)) => Ok(Value::Text(key_text(&data))),
                other => Err(Error::unexpected("bulk key", other)),
            })
            .collect::<ClientResult<Vec<Value>>>()
            .map(Value::List),
        other => Err(Error::unexpected("array of keys", other)),
    }
}

fn list_to_map(reply: Reply) -> ClientResult<Value> {
    let items = match reply {
        Reply::Array(items) if items.len() % 2 == 0 => items,
        other => return Err(Error::unexpected("array of field/value pairs", other)),
    };
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        let field = match field {
            Reply::Bulk(Some(data)) => key_text(&data),
            other => return Err(Error::unexpected("bulk field name", other)),
        };
        pairs.push((field, Value::from(value)));
    }
    Ok(Value::Map(pairs))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn bulk(data: &'static [u8]) -> Reply {
        Reply::Bulk(Some(Bytes::from_static(data)))
    }

    #[test]
    fn hgetall_reply_becomes_map() {
        let value = list_to_map(Reply::Array(vec![
            bulk(b"foo"),
            bulk(b"1"),
            bulk(b"bar"),
            bulk(b"2"),
        ]))
        .unwrap();
        assert_eq!(value.get("bar"), Some(&Value::Bytes(Bytes::from_static(b"2"))));
        assert_eq!(list_to_map(Reply::Array(Vec::new())).unwrap(), Value::Map(Vec::new()));
    }

    #[test]
    fn odd_hgetall_reply_is_rejected() {
        assert!(list_to_map(Reply::Array(vec![bulk(b"orphan")])).is_err());
    }

    #[test]
    fn keys_become_text() {
        let value = list_of_keys(Reply::Array(vec![bulk(b"a"), bulk(b"b")])).unwrap();
        assert_eq!(
            value,
            Value::List(vec![Value::Text("a".into()), Value::Text("b".into())])
        );
    }

    #[test]
    fn integer_replies_become_bools() {
        assert_eq!(integer_to_bool(Reply::Integer(1)).unwrap(), Value::Bool(true));
        assert_eq!(integer_to_bool(Reply::Integer(0)).unwrap(), Value::Bool(false));
        assert!(integer_to_bool(Reply::Status("OK".into())).is_err());
    }
}
