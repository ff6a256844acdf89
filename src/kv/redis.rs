//! Redis-backed interlock variant: a minimal hand-rolled RESP client
//! issuing `SET key val NX PX <ms>` over a raw TCP connection, mirroring
//! the teacher's approach of speaking wire protocols directly rather than
//! depending on a client crate that isn't already part of its stack (the
//! teacher hand-rolls its own git pack/protocol framing the same way).

use std::{
    io::{BufRead, BufReader, Read, Write},
    net::TcpStream,
    sync::Mutex,
    time::Duration,
};

use crate::kv::Interlock;

pub struct RedisInterlock {
    url: String,
    lifetime: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl RedisInterlock {
    pub fn new(url: String, lifetime: Duration) -> Self {
        Self {
            url,
            lifetime,
            conn: Mutex::new(None),
        }
    }

    fn address(&self) -> String {
        self.url
            .trim_start_matches("redis://")
            .split('/')
            .next()
            .unwrap_or("127.0.0.1:6379")
            .to_string()
    }

    fn with_connection<T>(&self, f: impl FnOnce(&mut TcpStream) -> std::io::Result<T>) -> std::io::Result<T> {
        let mut guard = self.conn.lock().unwrap();
        if guard.is_none() {
            *guard = Some(TcpStream::connect(self.address())?);
        }
        let stream = guard.as_mut().unwrap();
        match f(stream) {
            Ok(v) => Ok(v),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }

    fn set_nx_px(&self, key: &str, millis: u128) -> std::io::Result<bool> {
        self.with_connection(|stream| {
            let command = encode_command(&["SET", key, "1", "NX", "PX", &millis.to_string()]);
            stream.write_all(&command)?;
            let mut reader = BufReader::new(stream.try_clone()?);
            let mut line = String::new();
            reader.read_line(&mut line)?;
            // A successful SET NX replies `$2\r\nOK\r\n`(bulk) or
            // `+OK\r\n` (simple string) depending on server version; a
            // missed NX replies `$-1\r\n` (nil bulk).
            if line.starts_with("+OK") {
                return Ok(true);
            }
            if line.starts_with("$-1") {
                return Ok(false);
            }
            if line.starts_with('$') {
                let mut body = String::new();
                reader.read_line(&mut body)?;
                return Ok(body.trim() == "OK");
            }
            Ok(false)
        })
    }

    fn del(&self, key: &str) -> std::io::Result<()> {
        self.with_connection(|stream| {
            let command = encode_command(&["DEL", key]);
            stream.write_all(&command)?;
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf)?;
            Ok(())
        })
    }
}

fn encode_command(parts: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

impl Interlock for RedisInterlock {
    fn try_begin_update(&self, key: &str) -> bool {
        self.set_nx_px(key, self.lifetime.as_millis()).unwrap_or(false)
    }

    fn release(&self, key: &str) {
        let _ = self.del(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_resp_array_of_bulk_strings() {
        let encoded = encode_command(&["SET", "k", "1", "NX", "PX", "300000"]);
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.starts_with("*6\r\n$3\r\nSET\r\n"));
        assert!(text.contains("$2\r\nNX\r\n"));
    }

    #[test]
    fn address_strips_scheme_and_db_suffix() {
        let lock = RedisInterlock::new("redis://cache.internal:6380/2".to_string(), Duration::from_secs(60));
        assert_eq!(lock.address(), "cache.internal:6380");
    }
}
