//! Exact command sequences, checked against a scripted single-connection server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pcache_client::{CacheClient, CacheError, ClientConfig, Expiration, Getter};

type Handler = fn(usize, Vec<Vec<u8>>, &mut TcpStream);

fn spawn_server(expected_commands: usize, handler: Handler) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    (addr, handle)
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(invalid("missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("length"))
}

fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("+{}\r\n", msg).as_bytes());
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    write_raw(stream, &out);
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    write_raw(stream, format!(":{}\r\n", value).as_bytes());
}

fn args_of(args: &[Vec<u8>]) -> Vec<&str> {
    args.iter()
        .map(|arg| std::str::from_utf8(arg).expect("utf8 arg"))
        .collect()
}

fn config_for(addr: String) -> ClientConfig {
    ClientConfig {
        addr,
        max_idle: 1,
        max_active: 1,
        connect_timeout: Some(Duration::from_secs(1)),
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    }
}

#[test]
fn dial_selects_configured_database() {
    let (addr, server) = spawn_server(2, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args_of(&args), ["SELECT", "3"]);
            write_simple(stream, "OK");
        }
        _ => {
            assert_eq!(args_of(&args), ["PING"]);
            write_simple(stream, "PONG");
        }
    });

    let client = CacheClient::with_config(config_for(addr).with_database(3)).expect("client");
    client.ping().expect("ping");
    server.join().expect("server");
}

#[test]
fn auth_precedes_select() {
    let (addr, server) = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args_of(&args), ["AUTH", "secret"]);
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args_of(&args), ["SELECT", "0"]);
            write_simple(stream, "OK");
        }
        _ => {
            assert_eq!(args_of(&args), ["GET", "greeting"]);
            write_bulk(stream, b"\"hello\"");
        }
    });

    let config = ClientConfig {
        password: Some("secret".to_string()),
        ..config_for(addr)
    };
    let client = CacheClient::with_config(config).expect("client");
    let value: String = client.get("greeting").expect("get");
    assert_eq!(value, "hello");
    server.join().expect("server");
}

#[test]
fn rejected_auth_fails_the_acquire() {
    let (addr, server) = spawn_server(1, |_, args, stream| {
        assert_eq!(args_of(&args), ["AUTH", "wrong"]);
        write_raw(stream, b"-WRONGPASS invalid username-password pair\r\n");
    });

    let config = ClientConfig {
        password: Some("wrong".to_string()),
        ..config_for(addr)
    };
    let client = CacheClient::with_config(config).expect("client");
    let err = client.ping().unwrap_err();
    assert!(matches!(err, CacheError::Server { ref message } if message.starts_with("WRONGPASS")));
    assert_eq!(client.stats().open, 0);
    server.join().expect("server");
}

#[test]
fn expirations_pick_setex_or_set() {
    let (addr, server) = spawn_server(4, |idx, args, stream| {
        match idx {
            0 => assert_eq!(args_of(&args), ["SELECT", "0"]),
            1 => assert_eq!(args_of(&args), ["SETEX", "a", "90", "1"]),
            2 => assert_eq!(args_of(&args), ["SET", "b", "2"]),
            _ => assert_eq!(args_of(&args), ["SETEX", "c", "3600", "3"]),
        }
        write_simple(stream, "OK");
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    client
        .set("a", &1, Expiration::After(Duration::from_millis(89_001)))
        .expect("set a");
    client.set("b", &2, Expiration::Never).expect("set b");
    client.set("c", &3, Expiration::Default).expect("set c");
    server.join().expect("server");
}

#[test]
fn add_checks_existence_first() {
    let (addr, server) = spawn_server(2, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        _ => {
            assert_eq!(args_of(&args), ["EXISTS", "taken"]);
            write_integer(stream, 1);
        }
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    let err = client.add("taken", &1, Expiration::Never).unwrap_err();
    assert!(err.is_not_stored());
    server.join().expect("server");
}

#[test]
fn decrement_reads_then_clamps() {
    let (addr, server) = spawn_server(4, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 => {
            assert_eq!(args_of(&args), ["EXISTS", "counter"]);
            write_integer(stream, 1);
        }
        2 => {
            assert_eq!(args_of(&args), ["GET", "counter"]);
            write_bulk(stream, b"3");
        }
        _ => {
            assert_eq!(args_of(&args), ["DECRBY", "counter", "3"]);
            write_integer(stream, 0);
        }
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    assert_eq!(client.decrement("counter", 10).expect("decrement"), 0);
    server.join().expect("server");
}

#[test]
fn increment_reads_before_incrby() {
    let (addr, server) = spawn_server(4, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 => {
            assert_eq!(args_of(&args), ["EXISTS", "hits"]);
            write_integer(stream, 1);
        }
        2 => {
            assert_eq!(args_of(&args), ["GET", "hits"]);
            write_bulk(stream, b"4");
        }
        _ => {
            assert_eq!(args_of(&args), ["INCRBY", "hits", "2"]);
            write_integer(stream, 6);
        }
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    assert_eq!(client.increment("hits", 2).expect("increment"), 6);
    server.join().expect("server");
}

#[test]
fn negative_counter_is_never_written() {
    // EXISTS and GET only: a third command would fail the script.
    let (addr, server) = spawn_server(3, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 => write_integer(stream, 1),
        _ => {
            assert_eq!(args_of(&args), ["GET", "hits"]);
            write_bulk(stream, b"-5");
        }
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    let err = client.increment("hits", 2).unwrap_err();
    assert!(matches!(err, CacheError::UnexpectedResponse));
    assert_eq!(client.stats().idle, 1);
    server.join().expect("server");
}

#[test]
fn null_mget_reply_is_a_miss() {
    let (addr, server) = spawn_server(2, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        _ => {
            assert_eq!(args_of(&args), ["MGET", "a", "b"]);
            write_raw(stream, b"*-1\r\n");
        }
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    let err = client.get_multi(&["a", "b"]).unwrap_err();
    assert!(err.is_miss());
    server.join().expect("server");
}

#[test]
fn mget_nil_slots_are_per_key_misses() {
    let (addr, server) = spawn_server(2, |idx, _, stream| match idx {
        0 => write_simple(stream, "OK"),
        _ => write_raw(stream, b"*2\r\n$1\r\n7\r\n$-1\r\n"),
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    let items = client.get_multi(&["a", "b"]).expect("get_multi");
    assert_eq!(items.get::<u32>("a").expect("a"), 7);
    assert!(items.get::<u32>("b").unwrap_err().is_miss());
    server.join().expect("server");
}

#[test]
fn delete_matching_batches_del() {
    let (addr, server) = spawn_server(3, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 => {
            assert_eq!(args_of(&args), ["KEYS", "user:*"]);
            write_raw(stream, b"*2\r\n$6\r\nuser:1\r\n$6\r\nuser:2\r\n");
        }
        _ => {
            assert_eq!(args_of(&args), ["DEL", "user:1", "user:2"]);
            write_integer(stream, 2);
        }
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    assert_eq!(client.delete_matching("user:*").expect("delete"), 2);
    server.join().expect("server");
}

#[test]
fn server_errors_keep_connection_usable() {
    let (addr, server) = spawn_server(5, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 => write_integer(stream, 1),
        2 => write_bulk(stream, b"9223372036854775807"),
        3 => {
            assert_eq!(args_of(&args), ["INCRBY", "big", "1"]);
            write_raw(stream, b"-ERR increment or decrement would overflow\r\n");
        }
        _ => write_simple(stream, "PONG"),
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    let err = client.increment("big", 1).unwrap_err();
    assert!(matches!(err, CacheError::Server { ref message } if message.contains("overflow")));
    assert_eq!(client.stats().idle, 1);
    client.ping().expect("ping on the same connection");
    assert_eq!(client.stats().dialed, 1);
    server.join().expect("server");
}

#[test]
fn protocol_errors_discard_connection() {
    let (addr, server) = spawn_server(2, |idx, _, stream| match idx {
        0 => write_simple(stream, "OK"),
        _ => write_raw(stream, b"?garbage\r\n"),
    });

    let client = CacheClient::with_config(config_for(addr)).expect("client");
    let err = client.ping().unwrap_err();
    assert!(err.is_transport());
    let stats = client.stats();
    assert_eq!(stats.open, 0);
    assert_eq!(stats.idle, 0);
    server.join().expect("server");
}
