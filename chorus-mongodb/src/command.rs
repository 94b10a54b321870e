//! Database commands.
//!
//! Commands run against a [`Target`]: a server (on its database, or
//! `admin` when it has none) or a collection (on the collection's
//! database). A command is either a table or an alternating list of names
//! and values:
//!
//! ```rust
//! use chorus_mongodb::command::make_command;
//! use chorus_value::Value;
//!
//! let cmd = make_command(&[
//!     Value::symbol("count"),
//!     Value::from("users"),
//!     Value::symbol("limit"),
//!     Value::from(5),
//! ])
//! .unwrap();
//! assert_eq!(cmd.len(), 2);
//! ```

use std::time::Instant;

use chorus_value::{Slot, Table, Value};
use tracing::info;

use crate::codec::Codec;
use crate::collection::Collection;
use crate::driver::Connection;
use crate::error::{MongoError, MongoResult};
use crate::flags::BehaviorFlags;
use crate::options::OptionLayers;
use crate::server::Server;

/// Database used for commands on a server without a database name.
pub const ADMIN_DATABASE: &str = "admin";

/// Where a command runs.
#[derive(Debug, Clone)]
pub enum Target {
    /// A server's database.
    Server(Server),
    /// A collection's database.
    Collection(Collection),
}

impl From<Server> for Target {
    fn from(server: Server) -> Self {
        Self::Server(server)
    }
}

impl From<Collection> for Target {
    fn from(collection: Collection) -> Self {
        Self::Collection(collection)
    }
}

impl Target {
    fn server(&self) -> &Server {
        match self {
            Self::Server(server) => server,
            Self::Collection(coll) => coll.server(),
        }
    }

    /// The database commands run on.
    pub fn database(&self) -> &str {
        match self {
            Self::Server(server) => server.dbname().unwrap_or(ADMIN_DATABASE),
            Self::Collection(coll) => coll.database(),
        }
    }

    fn call(&self, options: &Value) -> (OptionLayers, BehaviorFlags) {
        match self {
            Self::Server(server) => server.call(options),
            Self::Collection(coll) => coll.call(options),
        }
    }

    fn codec(&self, flags: BehaviorFlags) -> Codec<'_> {
        match self {
            Self::Server(server) => server.codec(flags),
            Self::Collection(coll) => coll.codec(flags),
        }
    }

    fn context(&self) -> String {
        match self {
            Self::Server(server) => server.uri(),
            Self::Collection(coll) => coll.context(),
        }
    }

    fn with_connection<T, F>(&self, flags: BehaviorFlags, f: F) -> MongoResult<T>
    where
        F: FnOnce(&mut dyn Connection) -> MongoResult<T>,
    {
        let mut conn = self.server().acquire(flags)?;
        let result = f(conn.connection()?);
        conn.release();
        result.map_err(|e| e.with_context(self.context()))
    }

    fn log(&self, flags: BehaviorFlags, command: &Value, started: Instant) {
        if flags.contains(BehaviorFlags::LOGOPS) || self.server().settings().log_cmds {
            info!(
                database = self.database(),
                command = %command,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "MongoDB command"
            );
        }
    }
}

/// Assemble a command table from alternating names and values.
///
/// The first name is the command itself, so insertion order is kept.
/// Names may be symbols or strings.
pub fn make_command(fields: &[Value]) -> MongoResult<Table> {
    if fields.len() % 2 != 0 {
        return Err(MongoError::bad_query(format!(
            "command fields must come in name/value pairs, got {} items",
            fields.len()
        )));
    }
    let mut command = Table::with_capacity(fields.len() / 2);
    for pair in fields.chunks_exact(2) {
        let slot = match Slot::from_value(&pair[0]) {
            Some(slot @ (Slot::Symbol(_) | Slot::String(_))) => slot,
            _ => {
                return Err(MongoError::bad_query(format!(
                    "command field name must be a symbol or string, not {}",
                    pair[0]
                )));
            }
        };
        command.insert(slot, pair[1].clone());
    }
    Ok(command)
}

/// Run a command given positionally.
///
/// `args` is one of:
/// - a command table, optionally followed by an options value;
/// - an odd number of items: a command name/value list of which the first
///   item is the options;
/// - an even number of items: a command name/value list.
///
/// Returns the command's result documents as a choice.
pub fn command(target: &Target, args: &[Value]) -> MongoResult<Value> {
    match args {
        [] => Err(MongoError::bad_query("no command given")),
        [cmd @ Value::Table(_)] => raw_command(target, cmd, &Value::Void),
        [cmd @ Value::Table(_), options] => raw_command(target, cmd, options),
        [options, rest @ ..] if args.len() % 2 == 1 => {
            raw_command(target, &Value::Table(make_command(rest)?), options)
        }
        fields => raw_command(target, &Value::Table(make_command(fields)?), &Value::Void),
    }
}

/// Run a command document, returning its result documents as a choice.
///
/// A reply holding a cursor yields the documents of its first batch; any
/// other reply yields itself.
pub fn raw_command(target: &Target, command: &Value, options: &Value) -> MongoResult<Value> {
    let started = Instant::now();
    let (_layers, flags) = target.call(options);
    let codec = target.codec(flags);
    let doc = codec.encode_document(command)?;
    let replies = target.with_connection(flags, |conn| conn.run_command(target.database(), doc))?;
    target.log(flags, command, started);
    let values = replies
        .iter()
        .map(|reply| codec.decode_document(reply))
        .collect::<MongoResult<Vec<_>>>()?;
    Ok(Value::choice(values))
}

/// Run a command document, returning the reply document.
pub fn command_one(target: &Target, command: &Value, options: &Value) -> MongoResult<Value> {
    let started = Instant::now();
    let (_layers, flags) = target.call(options);
    let codec = target.codec(flags);
    let doc = codec.encode_document(command)?;
    let reply = target.with_connection(flags, |conn| conn.command_simple(target.database(), doc))?;
    target.log(flags, command, started);
    codec.decode_document(&reply)
}

impl Server {
    /// Run a command on this server's database.
    pub fn command(&self, args: &[Value]) -> MongoResult<Value> {
        command(&Target::Server(self.clone()), args)
    }
}

impl Collection {
    /// Run a command on this collection's database.
    pub fn command(&self, args: &[Value]) -> MongoResult<Value> {
        command(&Target::Collection(self.clone()), args)
    }
}
