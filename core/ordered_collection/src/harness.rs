//! A line oriented command interpreter for exercising an [OrderedCollection] by hand or from a fuzzer.
//!
//! Each input line holds one command. Blank lines and lines starting with `#` are skipped.
//!
//! | Command                  | Effect                                                        |
//! |--------------------------|---------------------------------------------------------------|
//! | `insert K`, `i K`        | Inserts a new structure keyed by `K`.                         |
//! | `find K`, `f K`          | Looks `K` up.                                                 |
//! | `delete K`, `d K`        | Looks `K` up and deletes it.                                  |
//! | `forward-list`, `fl`     | Lists every key in ascending order.                           |
//! | `backward-list`, `bl`    | Lists every key in descending order.                          |
//! | `forward-empty`, `fe`    | Deletes every entry in ascending order, reporting each key.   |
//! | `backward-empty`, `be`   | Deletes every entry in descending order, reporting each key.  |
//! | `help`, `h`              | Prints the command summary.                                   |
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::{cmp::Ordering, fmt, str::FromStr};
use std::io::{self, BufRead, Write};

use crate::{Error, InsertError, OrderedCollection};

const HELP: &str = "\
Supported commands:
  insert K, i K        insert a structure keyed by the integer K
  find K, f K          look up the structure keyed by K
  delete K, d K        look up and delete the structure keyed by K
  forward-list, fl     list all keys in ascending order
  backward-list, bl    list all keys in descending order
  forward-empty, fe    delete all entries in ascending order
  backward-empty, be   delete all entries in descending order
  help, h              print this summary
";

/// The structure the harness allocates for every inserted key.
#[derive(Debug, PartialEq, Eq)]
pub struct UserStruct {
    /// The key the structure is ordered by.
    pub key: i32,
    /// Number of the input line that created the structure.
    pub line: usize,
}

fn compare_user_structs(a: &Box<UserStruct>, b: &Box<UserStruct>) -> Ordering {
    a.key.cmp(&b.key)
}

fn compare_key(key: &i32, user_struct: &Box<UserStruct>) -> Ordering {
    key.cmp(&user_struct.key)
}

/// A single parsed command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Insert(i32),
    Find(i32),
    Delete(i32),
    ForwardList,
    BackwardList,
    ForwardEmpty,
    BackwardEmpty,
    Help,
}

/// Reasons a command line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command name is not recognized.
    Unknown(String),
    /// The command needs an integer key and got something else.
    InvalidKey { command: String, argument: String },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(line) => write!(f, "unknown command \"{line}\""),
            CommandError::InvalidKey { command, argument } => write!(f, "{command}: invalid key \"{argument}\""),
        }
    }
}

impl std::error::Error for CommandError {}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, argument) = match line.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, Some(argument.trim())),
            None => (line, None),
        };

        let key = || {
            let argument = argument.unwrap_or_default();
            argument
                .parse::<i32>()
                .map_err(|_| CommandError::InvalidKey { command: name.to_string(), argument: argument.to_string() })
        };

        let command = match name {
            "insert" | "i" => Command::Insert(key()?),
            "find" | "f" => Command::Find(key()?),
            "delete" | "d" => Command::Delete(key()?),
            _ if argument.is_some() => return Err(CommandError::Unknown(line.to_string())),
            "forward-list" | "fl" => Command::ForwardList,
            "backward-list" | "bl" => Command::BackwardList,
            "forward-empty" | "fe" => Command::ForwardEmpty,
            "backward-empty" | "be" => Command::BackwardEmpty,
            "help" | "h" => Command::Help,
            _ => return Err(CommandError::Unknown(line.to_string())),
        };
        Ok(command)
    }
}

/// Traversal direction for the list and empty commands.
#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Executes commands against an ordered collection of heap allocated [UserStruct]s, writing results to `out`.
pub struct Harness<W: Write> {
    collection: OrderedCollection<Box<UserStruct>, i32>,
    out: W,
    line: usize,
}

impl<W: Write> Harness<W> {
    /// Creates a harness around an empty, unbounded collection.
    pub fn new(out: W) -> Self {
        Self::with_collection(OrderedCollection::init(compare_user_structs, compare_key), out)
    }

    /// Creates a harness around an existing collection, for example one with a node limit.
    pub fn with_collection(collection: OrderedCollection<Box<UserStruct>, i32>, out: W) -> Self {
        Harness { collection, out, line: 0 }
    }

    /// The collection driven by the harness.
    pub fn collection(&self) -> &OrderedCollection<Box<UserStruct>, i32> {
        &self.collection
    }

    /// Executes every line of `input`.
    pub fn run<R: BufRead>(&mut self, input: R) -> io::Result<()> {
        for line in input.lines() {
            self.execute(&line?)?;
        }
        self.out.flush()
    }

    /// Executes a single command line.
    pub fn execute(&mut self, line: &str) -> io::Result<()> {
        self.line += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }

        match trimmed.parse::<Command>() {
            Ok(command) => {
                log::debug!("line {}: {:?}", self.line, command);
                self.dispatch(command)
            }
            Err(err) => {
                log::warn!("line {}: {}", self.line, err);
                writeln!(self.out, "{err}")
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> io::Result<()> {
        match command {
            Command::Insert(key) => self.insert(key),
            Command::Find(key) => self.find(key),
            Command::Delete(key) => self.delete(key),
            Command::ForwardList => self.list(Direction::Forward),
            Command::BackwardList => self.list(Direction::Backward),
            Command::ForwardEmpty => self.empty(Direction::Forward, true),
            Command::BackwardEmpty => self.empty(Direction::Backward, true),
            Command::Help => self.out.write_all(HELP.as_bytes()),
        }
    }

    fn insert(&mut self, key: i32) -> io::Result<()> {
        let user_struct = Box::new(UserStruct { key, line: self.line });
        match self.collection.insert(user_struct) {
            Ok(_) => writeln!(self.out, "{key}: inserted"),
            Err(err @ InsertError::AlreadyExists { .. }) => {
                if let Some(existing) = err.existing().and_then(|entry| self.collection.user_struct(entry).ok()) {
                    log::debug!("{key} was inserted on line {}", existing.line);
                }
                drop(err.into_user_struct());
                writeln!(self.out, "{key}: already exists")
            }
            Err(err @ InsertError::OutOfResources { .. }) => {
                drop(err.into_user_struct());
                writeln!(self.out, "{key}: out of resources")
            }
        }
    }

    fn find(&mut self, key: i32) -> io::Result<()> {
        match self.collection.find(&key) {
            Some(_) => writeln!(self.out, "{key}: found"),
            None => writeln!(self.out, "{key}: not found"),
        }
    }

    fn delete(&mut self, key: i32) -> io::Result<()> {
        match self.collection.delete_key(&key) {
            Ok(user_struct) => writeln!(self.out, "{}: removed", user_struct.key),
            Err(Error::NotFound) => writeln!(self.out, "{key}: not found"),
            Err(err) => Err(to_io_error(err)),
        }
    }

    fn list(&mut self, direction: Direction) -> io::Result<()> {
        let mut current = match direction {
            Direction::Forward => self.collection.min(),
            Direction::Backward => self.collection.max(),
        };
        while let Some(entry) = current {
            let user_struct = self.collection.user_struct(entry).map_err(to_io_error)?;
            writeln!(self.out, "{}", user_struct.key)?;
            current = match direction {
                Direction::Forward => self.collection.next(entry),
                Direction::Backward => self.collection.prev(entry),
            };
        }
        Ok(())
    }

    /// Deletes every entry walking in `direction`. The neighbor is fetched before the current entry is deleted.
    fn empty(&mut self, direction: Direction, report: bool) -> io::Result<()> {
        let mut current = match direction {
            Direction::Forward => self.collection.min(),
            Direction::Backward => self.collection.max(),
        };
        while let Some(entry) = current {
            current = match direction {
                Direction::Forward => self.collection.next(entry),
                Direction::Backward => self.collection.prev(entry),
            };
            let user_struct = self.collection.delete(entry).map_err(to_io_error)?;
            if report {
                writeln!(self.out, "{}: removed", user_struct.key)?;
            }
        }
        Ok(())
    }

    /// Releases every remaining entry, tears the collection down, and returns the output writer.
    pub fn finish(mut self) -> io::Result<W> {
        if !self.collection.is_empty() {
            log::debug!("Releasing {} entries left at end of input.", self.collection.len());
            self.empty(Direction::Forward, false)?;
        }
        self.collection.uninit().map_err(to_io_error)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

fn to_io_error(err: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}
