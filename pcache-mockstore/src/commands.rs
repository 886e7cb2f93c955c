//! # Command Dispatch
//!
//! Maps parsed RESP commands onto the keyspace and encodes the reply, using
//! the reply codes a Redis server would send for the same input.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::protocol::{
    resp_array, resp_bulk, resp_error, resp_error_code, resp_integer, resp_null, resp_ok,
    resp_simple, resp_wrongtype,
};
use crate::store::{Database, Store, TtlStatus, Value, DB_COUNT};

/// Per-connection state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Selected database index.
    pub db: usize,
    /// Whether AUTH succeeded (always true when no password is configured).
    pub authenticated: bool,
}

impl Session {
    pub fn new(requires_auth: bool) -> Self {
        Session {
            db: 0,
            authenticated: !requires_auth,
        }
    }
}

/// Executes one command and returns the encoded reply.
pub fn dispatch(
    args: &[Vec<u8>],
    session: &mut Session,
    store: &Mutex<Store>,
    password: Option<&str>,
) -> Vec<u8> {
    if args.is_empty() {
        return resp_error("empty command");
    }

    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    if name == "AUTH" {
        return handle_auth(args, session, password);
    }
    if !session.authenticated {
        return resp_error_code("NOAUTH", "Authentication required.");
    }

    match name.as_str() {
        "PING" => handle_ping(args),
        "SELECT" => handle_select(args, session),
        "FLUSHALL" => {
            store.lock().flush_all();
            resp_ok()
        }
        _ => {
            let mut store = store.lock();
            let db = store.db(session.db);
            dispatch_keyspace(&name, args, db)
        }
    }
}

fn dispatch_keyspace(name: &str, args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    match name {
        "GET" => handle_get(args, db),
        "SET" => handle_set(args, db),
        "SETEX" => handle_setex(args, db),
        "MGET" => handle_mget(args, db),
        "EXISTS" => handle_exists(args, db),
        "DEL" => handle_del(args, db),
        "TTL" => handle_ttl(args, db),
        "KEYS" => handle_keys(args, db),
        "INCRBY" => handle_incr(args, db, false),
        "DECRBY" => handle_incr(args, db, true),
        "INCRBYFLOAT" => handle_incrbyfloat(args, db),
        "SADD" => handle_sadd(args, db),
        "SMEMBERS" => handle_smembers(args, db),
        "ZADD" => handle_zadd(args, db),
        "ZRANGE" => handle_zrange(args, db),
        "SORT" => handle_sort(args, db),
        "HSET" => handle_hset(args, db),
        "HGET" => handle_hget(args, db),
        "HKEYS" => handle_hkeys(args, db),
        "RPUSH" => handle_rpush(args, db),
        "LPOP" => handle_lpop(args, db),
        _ => resp_error(&format!("unknown command '{}'", name)),
    }
}

fn wrong_args(name: &str) -> Vec<u8> {
    resp_error(&format!(
        "wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    ))
}

fn handle_auth(args: &[Vec<u8>], session: &mut Session, password: Option<&str>) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("AUTH");
    }
    match password {
        None => resp_error("Client sent AUTH, but no password is set"),
        Some(expected) if expected.as_bytes() == args[1].as_slice() => {
            session.authenticated = true;
            resp_ok()
        }
        Some(_) => resp_error_code("WRONGPASS", "invalid username-password pair"),
    }
}

fn handle_ping(args: &[Vec<u8>]) -> Vec<u8> {
    match args.len() {
        1 => resp_simple("PONG"),
        2 => resp_bulk(&args[1]),
        _ => wrong_args("PING"),
    }
}

fn handle_select(args: &[Vec<u8>], session: &mut Session) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("SELECT");
    }
    match parse_i64(&args[1]) {
        Some(index) if index >= 0 && (index as usize) < DB_COUNT => {
            session.db = index as usize;
            resp_ok()
        }
        Some(_) => resp_error("DB index is out of range"),
        None => resp_error("value is not an integer or out of range"),
    }
}

fn handle_get(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("GET");
    }
    match db.value(&args[1]) {
        Some(Value::Str(data)) => resp_bulk(data),
        Some(_) => resp_wrongtype(),
        None => resp_null(),
    }
}

fn handle_set(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    match args.len() {
        3 => {
            db.set_string(&args[1], args[2].clone(), None);
            resp_ok()
        }
        5 if args[3].eq_ignore_ascii_case(b"EX") => match parse_expire(&args[4], "set") {
            Ok(ttl) => {
                db.set_string(&args[1], args[2].clone(), Some(ttl));
                resp_ok()
            }
            Err(reply) => reply,
        },
        n if n < 3 => wrong_args("SET"),
        _ => resp_error("syntax error"),
    }
}

fn handle_setex(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 4 {
        return wrong_args("SETEX");
    }
    match parse_expire(&args[2], "setex") {
        Ok(ttl) => {
            db.set_string(&args[1], args[3].clone(), Some(ttl));
            resp_ok()
        }
        Err(reply) => reply,
    }
}

/// Parses a positive expiry in seconds whose millisecond deadline fits in
/// an `i64`, as the real server requires.
fn parse_expire(arg: &[u8], command: &str) -> Result<Duration, Vec<u8>> {
    match parse_i64(arg) {
        Some(secs) if secs > 0 && secs <= i64::MAX / 1000 => {
            let ttl = Duration::from_secs(secs as u64);
            match Instant::now().checked_add(ttl) {
                Some(_) => Ok(ttl),
                None => Err(resp_error(&format!("invalid expire time in '{}' command", command))),
            }
        }
        Some(_) => Err(resp_error(&format!("invalid expire time in '{}' command", command))),
        None => Err(resp_error("value is not an integer or out of range")),
    }
}

fn handle_mget(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_args("MGET");
    }
    let values: Vec<Option<Vec<u8>>> = args[1..]
        .iter()
        .map(|key| match db.value(key) {
            Some(Value::Str(data)) => Some(data.clone()),
            _ => None,
        })
        .collect();
    resp_array(values)
}

fn handle_exists(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_args("EXISTS");
    }
    let count = args[1..].iter().filter(|key| db.exists(key)).count();
    resp_integer(count as i64)
}

fn handle_del(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_args("DEL");
    }
    let removed = args[1..].iter().filter(|key| db.remove(key)).count();
    resp_integer(removed as i64)
}

fn handle_ttl(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("TTL");
    }
    match db.ttl(&args[1]) {
        TtlStatus::Missing => resp_integer(-2),
        TtlStatus::NoExpiry => resp_integer(-1),
        // Round to the nearest second like the real server does.
        TtlStatus::ExpiresIn(remaining) => {
            resp_integer(((remaining.as_millis() + 500) / 1000) as i64)
        }
    }
}

fn handle_keys(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("KEYS");
    }
    resp_array(db.keys(&args[1]).into_iter().map(Some))
}

fn handle_incr(args: &[Vec<u8>], db: &mut Database, decrement: bool) -> Vec<u8> {
    let name = if decrement { "DECRBY" } else { "INCRBY" };
    if args.len() != 3 {
        return wrong_args(name);
    }
    let delta = match parse_i64(&args[2]) {
        Some(delta) => delta,
        None => return resp_error("value is not an integer or out of range"),
    };

    let entry = db.entry_or_insert(&args[1], || Value::Str(b"0".to_vec()));
    let data = match &mut entry.value {
        Value::Str(data) => data,
        _ => return resp_wrongtype(),
    };
    let current = match parse_i64(data) {
        Some(current) => current,
        None => return resp_error("value is not an integer or out of range"),
    };
    let next = if decrement {
        current.checked_sub(delta)
    } else {
        current.checked_add(delta)
    };
    match next {
        Some(next) => {
            *data = next.to_string().into_bytes();
            resp_integer(next)
        }
        None => resp_error("increment or decrement would overflow"),
    }
}

fn handle_incrbyfloat(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 3 {
        return wrong_args("INCRBYFLOAT");
    }
    let delta = match parse_f64(&args[2]) {
        Some(delta) => delta,
        None => return resp_error("value is not a valid float"),
    };

    let entry = db.entry_or_insert(&args[1], || Value::Str(b"0".to_vec()));
    let data = match &mut entry.value {
        Value::Str(data) => data,
        _ => return resp_wrongtype(),
    };
    let current = match parse_f64(data) {
        Some(current) => current,
        None => return resp_error("value is not a valid float"),
    };
    let next = current + delta;
    if !next.is_finite() {
        return resp_error("increment would produce NaN or Infinity");
    }
    *data = format!("{}", next).into_bytes();
    resp_bulk(data)
}

fn handle_sadd(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 3 {
        return wrong_args("SADD");
    }
    let entry = db.entry_or_insert(&args[1], || Value::Set(BTreeSet::new()));
    let set = match &mut entry.value {
        Value::Set(set) => set,
        _ => return resp_wrongtype(),
    };
    let added = args[2..]
        .iter()
        .filter(|member| set.insert(member.to_vec()))
        .count();
    resp_integer(added as i64)
}

fn handle_smembers(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("SMEMBERS");
    }
    match db.value(&args[1]) {
        Some(Value::Set(set)) => resp_array(set.iter().map(Some)),
        Some(_) => resp_wrongtype(),
        None => resp_array(Vec::<Option<Vec<u8>>>::new()),
    }
}

fn handle_zadd(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 4 || (args.len() - 2) % 2 != 0 {
        return wrong_args("ZADD");
    }
    let mut pairs = Vec::with_capacity((args.len() - 2) / 2);
    for chunk in args[2..].chunks(2) {
        match parse_f64(&chunk[0]) {
            Some(score) if !score.is_nan() => pairs.push((score, chunk[1].clone())),
            _ => return resp_error("value is not a valid float"),
        }
    }

    let entry = db.entry_or_insert(&args[1], || Value::ZSet(Vec::new()));
    let zset = match &mut entry.value {
        Value::ZSet(zset) => zset,
        _ => return resp_wrongtype(),
    };
    let mut added = 0;
    for (score, member) in pairs {
        match zset.iter().position(|(_, existing)| *existing == member) {
            Some(idx) => zset[idx].0 = score,
            None => {
                zset.push((score, member));
                added += 1;
            }
        }
    }
    zset.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    resp_integer(added)
}

fn handle_zrange(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 4 {
        return wrong_args("ZRANGE");
    }
    let (start, stop) = match (parse_i64(&args[2]), parse_i64(&args[3])) {
        (Some(start), Some(stop)) => (start, stop),
        _ => return resp_error("value is not an integer or out of range"),
    };
    let zset = match db.value(&args[1]) {
        Some(Value::ZSet(zset)) => zset,
        Some(_) => return resp_wrongtype(),
        None => return resp_array(Vec::<Option<Vec<u8>>>::new()),
    };
    let members: Vec<Option<&Vec<u8>>> = match range_slice(zset.len(), start, stop) {
        Some(range) => zset[range].iter().map(|(_, member)| Some(member)).collect(),
        None => Vec::new(),
    };
    resp_array(members)
}

/// Normalizes inclusive, possibly negative `start..=stop` against `len`.
fn range_slice(len: usize, start: i64, stop: i64) -> Option<std::ops::Range<usize>> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some(start as usize..stop as usize + 1)
}

fn handle_sort(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_args("SORT");
    }

    let mut alpha = false;
    let mut descending = false;
    let mut limit: Option<(i64, i64)> = None;
    let mut idx = 2;
    while idx < args.len() {
        let option = String::from_utf8_lossy(&args[idx]).to_ascii_uppercase();
        match option.as_str() {
            "ALPHA" => alpha = true,
            "ASC" => descending = false,
            "DESC" => descending = true,
            "LIMIT" if idx + 2 < args.len() => {
                match (parse_i64(&args[idx + 1]), parse_i64(&args[idx + 2])) {
                    (Some(offset), Some(count)) => limit = Some((offset, count)),
                    _ => return resp_error("value is not an integer or out of range"),
                }
                idx += 2;
            }
            _ => return resp_error("syntax error"),
        }
        idx += 1;
    }

    let mut items: Vec<Vec<u8>> = match db.value(&args[1]) {
        None => Vec::new(),
        Some(Value::List(list)) => list.iter().cloned().collect(),
        Some(Value::Set(set)) => set.iter().cloned().collect(),
        Some(Value::ZSet(zset)) => zset.iter().map(|(_, member)| member.clone()).collect(),
        Some(_) => return resp_wrongtype(),
    };

    if alpha {
        items.sort();
    } else {
        let mut scored = Vec::with_capacity(items.len());
        for item in items {
            match parse_f64(&item) {
                Some(score) => scored.push((score, item)),
                None => return resp_error("One or more scores can't be converted into double"),
            }
        }
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        items = scored.into_iter().map(|(_, item)| item).collect();
    }
    if descending {
        items.reverse();
    }

    if let Some((offset, count)) = limit {
        let offset = offset.max(0) as usize;
        let count = if count < 0 { items.len() } else { count as usize };
        items = items.into_iter().skip(offset).take(count).collect();
    }
    resp_array(items.into_iter().map(Some))
}

fn handle_hset(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 4 || (args.len() - 2) % 2 != 0 {
        return wrong_args("HSET");
    }
    let entry = db.entry_or_insert(&args[1], || Value::Hash(BTreeMap::new()));
    let hash = match &mut entry.value {
        Value::Hash(hash) => hash,
        _ => return resp_wrongtype(),
    };
    let mut created = 0;
    for pair in args[2..].chunks(2) {
        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
            created += 1;
        }
    }
    resp_integer(created)
}

fn handle_hget(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 3 {
        return wrong_args("HGET");
    }
    match db.value(&args[1]) {
        Some(Value::Hash(hash)) => match hash.get(&args[2]) {
            Some(data) => resp_bulk(data),
            None => resp_null(),
        },
        Some(_) => resp_wrongtype(),
        None => resp_null(),
    }
}

fn handle_hkeys(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("HKEYS");
    }
    match db.value(&args[1]) {
        Some(Value::Hash(hash)) => resp_array(hash.keys().map(Some)),
        Some(_) => resp_wrongtype(),
        None => resp_array(Vec::<Option<Vec<u8>>>::new()),
    }
}

fn handle_rpush(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() < 3 {
        return wrong_args("RPUSH");
    }
    let entry = db.entry_or_insert(&args[1], || Value::List(VecDeque::new()));
    let list = match &mut entry.value {
        Value::List(list) => list,
        _ => return resp_wrongtype(),
    };
    list.extend(args[2..].iter().cloned());
    resp_integer(list.len() as i64)
}

fn handle_lpop(args: &[Vec<u8>], db: &mut Database) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_args("LPOP");
    }
    let (popped, now_empty) = match db.value(&args[1]) {
        Some(Value::List(list)) => {
            let popped = list.pop_front();
            (popped, list.is_empty())
        }
        Some(_) => return resp_wrongtype(),
        None => return resp_null(),
    };
    // Empty lists do not exist as keys.
    if now_empty {
        db.remove(&args[1]);
    }
    match popped {
        Some(data) => resp_bulk(&data),
        None => resp_null(),
    }
}

fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

fn parse_f64(arg: &[u8]) -> Option<f64> {
    std::str::from_utf8(arg).ok()?.trim().parse().ok()
}
