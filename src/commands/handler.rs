//! Command Parsing and Execution
//!
//! A decoded RESP frame becomes a typed [`Command`], the command runs
//! against the keyspace (and, for pub/sub, the client registry), and the
//! result comes back as a [`CommandResult`]:
//!
//! - `frames`: the reply frames written to the sender, in order
//!   (SUBSCRIBE acknowledges each channel with its own frame);
//! - `fan_out`: for PUBLISH, the message payload plus the subscriber
//!   targets it goes to. The consumer performs both writes, sender first,
//!   so the publisher's count always lands before any fan-out delivery.
//!
//! Every failure in this layer turns into a simple-error frame for the
//! sender; nothing propagates past the consumer. Internal invariant
//! violations (tag map and group map disagreeing) are logged at error
//! level and answered with a generic error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::error;

use crate::config::ServerConfig;
use crate::protocol::RespValue;
use crate::server::registry::{ClientRegistry, ClientWriter};
use crate::storage::{from_unix_seconds, KeyResult, Keyspace, KeyspaceError, Value};

/// Errors detected while turning a frame into a [`Command`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The frame is not an array of bulk strings
    #[error("invalid command format")]
    InvalidFormat,

    /// The frame is an empty array
    #[error("empty message")]
    EmptyMessage,

    /// The command name is not in the vocabulary
    #[error("invalid command: '{0}'")]
    UnknownCommand(String),

    /// Argument count does not match the command
    #[error("wrong number of arguments.")]
    WrongArity,

    /// SET expiry option was neither EX nor PX
    #[error("invalid resolution type")]
    InvalidResolution,

    /// An argument that must be an integer was not
    #[error("could not parse '{0}' to integer")]
    NotAnInteger(String),

    /// A ZADD score that must be a float was not
    #[error("could not parse '{0}' to float")]
    NotAFloat(String),

    /// ZADD received an odd number of score/member arguments
    #[error("<score> <member> values must come in pairs")]
    UnpairedScoreMember,

    /// CONFIG subcommand other than GET
    #[error("invalid cmd '{0}'")]
    InvalidConfigCommand(String),
}

/// The closed set of commands the server understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Echo(String),
    Set {
        key: String,
        value: String,
        expiry: Option<Duration>,
    },
    Get(String),
    ConfigGet(Vec<String>),
    Expire {
        key: String,
        seconds: i64,
    },
    ExpireAt {
        key: String,
        unix_seconds: i64,
    },
    Exists(Vec<String>),
    Del(Vec<String>),
    Incr(String),
    Decr(String),
    RPush {
        key: String,
        values: Vec<String>,
    },
    LPush {
        key: String,
        values: Vec<String>,
    },
    Subscribe(Vec<String>),
    Publish {
        channel: String,
        message: String,
    },
    ZAdd {
        key: String,
        pairs: Vec<String>,
    },
    ZRange {
        key: String,
        start: i64,
        stop: i64,
    },
}

impl Command {
    /// Builds a typed command from a decoded frame, validating arity and
    /// argument shapes. The command name is matched case-insensitively.
    pub fn from_frame(frame: RespValue) -> Result<Command, CommandError> {
        let elements = frame.into_array().ok_or(CommandError::InvalidFormat)?;
        if elements.is_empty() {
            return Err(CommandError::EmptyMessage);
        }

        let mut parts = Vec::with_capacity(elements.len());
        for element in &elements {
            match element.as_str() {
                Some(s) => parts.push(s.to_string()),
                None => return Err(CommandError::InvalidFormat),
            }
        }

        let name = parts[0].to_lowercase();
        let args = &parts[1..];

        match name.as_str() {
            "ping" => Ok(Command::Ping),
            "echo" => {
                if args.len() != 1 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Echo(args[0].clone()))
            }
            "set" => Self::parse_set(args),
            "get" => {
                if args.len() != 1 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Get(args[0].clone()))
            }
            "config" => {
                if args.len() < 2 {
                    return Err(CommandError::WrongArity);
                }
                let sub = args[0].to_uppercase();
                if sub != "GET" {
                    return Err(CommandError::InvalidConfigCommand(sub));
                }
                Ok(Command::ConfigGet(args[1..].to_vec()))
            }
            "expire" => {
                if args.len() != 2 {
                    return Err(CommandError::WrongArity);
                }
                let seconds = parse_int(&args[1])?;
                Ok(Command::Expire {
                    key: args[0].clone(),
                    seconds,
                })
            }
            "expireat" => {
                if args.len() != 2 {
                    return Err(CommandError::WrongArity);
                }
                let unix_seconds = parse_int(&args[1])?;
                Ok(Command::ExpireAt {
                    key: args[0].clone(),
                    unix_seconds,
                })
            }
            "exists" => {
                if args.is_empty() {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Exists(args.to_vec()))
            }
            "del" => {
                if args.is_empty() {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Del(args.to_vec()))
            }
            "incr" => {
                if args.len() != 1 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Incr(args[0].clone()))
            }
            "decr" => {
                if args.len() != 1 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Decr(args[0].clone()))
            }
            "rpush" => {
                if args.len() < 2 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::RPush {
                    key: args[0].clone(),
                    values: args[1..].to_vec(),
                })
            }
            "lpush" => {
                if args.len() < 2 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::LPush {
                    key: args[0].clone(),
                    values: args[1..].to_vec(),
                })
            }
            "subscribe" => {
                if args.is_empty() {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Subscribe(args.to_vec()))
            }
            "publish" => {
                if args.len() != 2 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::Publish {
                    channel: args[0].clone(),
                    message: args[1].clone(),
                })
            }
            "zadd" => {
                if args.len() < 3 {
                    return Err(CommandError::WrongArity);
                }
                let pairs = &args[1..];
                if pairs.len() % 2 != 0 {
                    return Err(CommandError::UnpairedScoreMember);
                }
                for pair in pairs.chunks(2) {
                    if pair[0].parse::<f64>().is_err() {
                        return Err(CommandError::NotAFloat(pair[0].clone()));
                    }
                }
                Ok(Command::ZAdd {
                    key: args[0].clone(),
                    pairs: pairs.to_vec(),
                })
            }
            "zrange" => {
                if args.len() != 3 {
                    return Err(CommandError::WrongArity);
                }
                Ok(Command::ZRange {
                    key: args[0].clone(),
                    start: parse_int(&args[1])?,
                    stop: parse_int(&args[2])?,
                })
            }
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    /// SET key value [EX seconds | PX milliseconds]
    fn parse_set(args: &[String]) -> Result<Command, CommandError> {
        let n = args.len();
        if n < 2 || (n > 2 && n != 4) {
            return Err(CommandError::WrongArity);
        }

        let expiry = if n == 4 {
            let magnitude = parse_int(&args[3])?.max(0) as u64;
            match args[2].to_uppercase().as_str() {
                "EX" => Some(Duration::from_secs(magnitude)),
                "PX" => Some(Duration::from_millis(magnitude)),
                _ => return Err(CommandError::InvalidResolution),
            }
        } else {
            None
        };

        Ok(Command::Set {
            key: args[0].clone(),
            value: args[1].clone(),
            expiry,
        })
    }
}

fn parse_int(raw: &str) -> Result<i64, CommandError> {
    raw.parse()
        .map_err(|_| CommandError::NotAnInteger(raw.to_string()))
}

/// A PUBLISH payload and the subscribers it goes to.
pub struct FanOut {
    pub payload: RespValue,
    pub targets: Vec<(SocketAddr, ClientWriter)>,
}

/// What the consumer writes after executing one command.
pub struct CommandResult {
    /// Frames for the sender, written in order.
    pub frames: Vec<RespValue>,
    /// Fan-out writes performed after the sender's frames.
    pub fan_out: Option<FanOut>,
}

impl CommandResult {
    fn reply(frame: RespValue) -> Self {
        CommandResult {
            frames: vec![frame],
            fan_out: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::reply(RespValue::error(message))
    }

    /// Serializes all sender frames into one buffer.
    pub fn serialize_frames(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for frame in &self.frames {
            frame.serialize_into(&mut buf);
        }
        buf
    }
}

/// Executes commands against the keyspace, registry and configuration.
#[derive(Clone)]
pub struct CommandHandler {
    keyspace: Arc<Keyspace>,
    registry: Arc<ClientRegistry>,
    config: Arc<ServerConfig>,
}

impl CommandHandler {
    pub fn new(
        keyspace: Arc<Keyspace>,
        registry: Arc<ClientRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            keyspace,
            registry,
            config,
        }
    }

    /// Parses and executes one frame on behalf of `sender`.
    ///
    /// Never fails: every error becomes a simple-error frame for the
    /// sender.
    pub fn execute(&self, frame: RespValue, sender: SocketAddr) -> CommandResult {
        match Command::from_frame(frame) {
            Ok(command) => self.run(command, sender),
            Err(e) => CommandResult::error(e.to_string()),
        }
    }

    fn run(&self, command: Command, sender: SocketAddr) -> CommandResult {
        match command {
            Command::Ping => CommandResult::reply(RespValue::pong()),
            Command::Echo(message) => {
                CommandResult::reply(RespValue::bulk_string(Bytes::from(message)))
            }
            Command::Set { key, value, expiry } => {
                self.keyspace.set(&key, Value::Str(value), expiry);
                CommandResult::reply(RespValue::ok())
            }
            Command::Get(key) => match self.keyspace.get(&key) {
                KeyResult::Str(value) => {
                    CommandResult::reply(RespValue::bulk_string(Bytes::from(value)))
                }
                _ => CommandResult::reply(RespValue::null()),
            },
            Command::ConfigGet(params) => self.cmd_config_get(&params),
            Command::Expire { key, seconds } => {
                let updated = self.keyspace.expire(&key, seconds);
                CommandResult::reply(RespValue::integer(i64::from(updated)))
            }
            Command::ExpireAt { key, unix_seconds } => {
                let deadline = from_unix_seconds(unix_seconds);
                let updated = self.keyspace.expire_at(&key, deadline);
                CommandResult::reply(RespValue::integer(i64::from(updated)))
            }
            Command::Exists(keys) => {
                let counts = self.keyspace.bulk_exists(&keys);
                let total: usize = counts.values().sum();
                CommandResult::reply(RespValue::integer(total as i64))
            }
            Command::Del(keys) => {
                let counts = self.keyspace.bulk_delete(&keys);
                let total: usize = counts.values().sum();
                CommandResult::reply(RespValue::integer(total as i64))
            }
            Command::Incr(key) => self.integer_reply(self.keyspace.increment_by(&key, 1)),
            Command::Decr(key) => self.integer_reply(self.keyspace.increment_by(&key, -1)),
            Command::RPush { key, values } => {
                self.length_reply(self.keyspace.push_tail(&key, values))
            }
            Command::LPush { key, values } => {
                self.length_reply(self.keyspace.push_head(&key, values))
            }
            Command::Subscribe(channels) => self.cmd_subscribe(&channels, sender),
            Command::Publish { channel, message } => self.cmd_publish(&channel, message, sender),
            Command::ZAdd { key, pairs } => {
                self.length_reply(self.keyspace.put_in_sorted_set(&key, &pairs))
            }
            Command::ZRange { key, start, stop } => {
                match self.keyspace.range_sorted_set(&key, start, stop) {
                    Ok(members) => CommandResult::reply(RespValue::array(
                        members
                            .into_iter()
                            .map(|m| RespValue::bulk_string(Bytes::from(m)))
                            .collect(),
                    )),
                    Err(e) => self.keyspace_error(e),
                }
            }
        }
    }

    fn cmd_config_get(&self, params: &[String]) -> CommandResult {
        let mut entries = Vec::with_capacity(params.len() * 2);
        for param in params {
            let param = param.to_lowercase();
            match self.config.get(&param) {
                Some(value) => {
                    entries.push(RespValue::bulk_string(Bytes::from(param)));
                    entries.push(RespValue::bulk_string(Bytes::from(value.to_string())));
                }
                None => {
                    return CommandResult::error(format!("invalid parameter '{}'", param));
                }
            }
        }
        CommandResult::reply(RespValue::array(entries))
    }

    fn cmd_subscribe(&self, channels: &[String], sender: SocketAddr) -> CommandResult {
        let mut frames = Vec::with_capacity(channels.len());
        for (i, channel) in channels.iter().enumerate() {
            if !self.registry.subscribe(&sender, channel) {
                error!(client = %sender, "subscribe from a connection that is not registered");
                return CommandResult::error("client not registered");
            }
            frames.push(RespValue::array(vec![
                RespValue::bulk_string(Bytes::from_static(b"subscribe")),
                RespValue::bulk_string(Bytes::from(channel.clone())),
                RespValue::integer((i + 1) as i64),
            ]));
        }
        CommandResult {
            frames,
            fan_out: None,
        }
    }

    fn cmd_publish(&self, channel: &str, message: String, sender: SocketAddr) -> CommandResult {
        let targets = self.registry.subscribers_excluding(channel, &sender);

        let payload = RespValue::array(vec![
            RespValue::bulk_string(Bytes::from_static(b"message")),
            RespValue::bulk_string(Bytes::from(channel.to_string())),
            RespValue::bulk_string(Bytes::from(message)),
        ]);

        CommandResult {
            frames: vec![RespValue::integer(targets.len() as i64)],
            fan_out: Some(FanOut { payload, targets }),
        }
    }

    fn integer_reply(&self, result: Result<i64, KeyspaceError>) -> CommandResult {
        match result {
            Ok(value) => CommandResult::reply(RespValue::integer(value)),
            Err(e) => self.keyspace_error(e),
        }
    }

    fn length_reply(&self, result: Result<usize, KeyspaceError>) -> CommandResult {
        match result {
            Ok(len) => CommandResult::reply(RespValue::integer(len as i64)),
            Err(e) => self.keyspace_error(e),
        }
    }

    /// Maps a keyspace error to a client-visible frame. A `Missing` error
    /// means the tag map and a group map disagree; clients get a generic
    /// answer while the details go to the log.
    fn keyspace_error(&self, e: KeyspaceError) -> CommandResult {
        match e {
            KeyspaceError::Missing(ref key) => {
                error!(key = %key, "keyspace invariant violation: tagged key has no value");
                CommandResult::error("internal error")
            }
            other => CommandResult::error(other.to_string()),
        }
    }
}
