//! Line-oriented manager console.
//!
//! Reads one command per line and answers with one or more lines of text:
//!
//! ```text
//! park <category>           take the first free slot
//! leave <category> <slot>   free an occupied slot
//! slots <category>          list the slots of a category
//! status                    availability and broker state
//! help
//! quit
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use parking_broker::{BrokerClient, SessionState};
use parking_core::{AllocationError, Allocator, ReleaseError, SlotId, VehicleCategory};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const HELP: &str = "\
commands:
  park <category>           take the first free slot
  leave <category> <slot>   free an occupied slot
  slots <category>          list the slots of a category
  status                    show availability and broker state
  help                      show this text
  quit                      exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Park(VehicleCategory),
    Leave {
        category: VehicleCategory,
        slot: SlotId,
    },
    Slots(VehicleCategory),
    Status,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Please select a vehicle type!")]
    MissingCategory,

    #[error("Please select a slot!")]
    MissingSlot,

    #[error("unexpected argument {0:?}")]
    TrailingArgument(String),

    #[error("unknown command {0:?}, type `help` for a list")]
    Unknown(String),
}

impl Command {
    /// Parse one input line. Blank lines parse to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let category = |words: &mut std::str::SplitWhitespace<'_>| {
            words
                .next()
                .map(VehicleCategory::from)
                .ok_or(CommandError::MissingCategory)
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "park" => Command::Park(category(&mut words)?),
            "leave" => {
                let category = category(&mut words)?;
                let slot = words
                    .next()
                    .map(SlotId::from)
                    .ok_or(CommandError::MissingSlot)?;
                Command::Leave { category, slot }
            }
            "slots" => Command::Slots(category(&mut words)?),
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        if let Some(extra) = words.next() {
            return Err(CommandError::TrailingArgument(extra.to_string()));
        }
        Ok(Some(command))
    }
}

/// What the caller should do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub struct Console {
    allocator: Arc<Allocator>,
    session: Option<BrokerClient>,
}

impl Console {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self {
            allocator,
            session: None,
        }
    }

    /// Report this session's state in `status`.
    pub fn with_session(mut self, session: BrokerClient) -> Self {
        self.session = Some(session);
        self
    }

    pub async fn execute(&self, command: Command) -> Reply {
        let text = match command {
            Command::Park(category) => self.park(&category).await,
            Command::Leave { category, slot } => self.leave(&category, &slot).await,
            Command::Slots(category) => self.slots(&category).await,
            Command::Status => self.status().await,
            Command::Help => HELP.to_string(),
            Command::Quit => return Reply::Quit,
        };
        Reply::Text(text)
    }

    async fn park(&self, category: &VehicleCategory) -> String {
        match self.allocator.occupy(category).await {
            Ok((slot, floor)) => format!("Your parking spot is: {slot} on {floor}"),
            Err(AllocationError::NoFreeSlot(category)) => {
                format!("No free slots available for {category}!")
            }
            Err(AllocationError::UnknownCategory(category)) => unknown_category(&category),
            Err(AllocationError::PublishFailed {
                slot,
                floor,
                source,
            }) => format!("Failed to publish to topic parking/{floor}/slot{slot}: {source}"),
        }
    }

    async fn leave(&self, category: &VehicleCategory, slot: &SlotId) -> String {
        match self.allocator.release(category, slot).await {
            Ok(floor) => format!("Slot {slot} on {floor} is now free."),
            Err(ReleaseError::SlotNotOccupied(_)) => {
                "This slot is not currently occupied!".to_string()
            }
            Err(ReleaseError::SlotNotInCategory { .. }) => {
                "This slot is not available for your vehicle type!".to_string()
            }
            Err(ReleaseError::UnknownCategory(category)) => unknown_category(&category),
            Err(ReleaseError::PublishFailed {
                slot,
                floor,
                source,
            }) => format!("Failed to publish to topic parking/{floor}/slot{slot}: {source}"),
        }
    }

    async fn slots(&self, category: &VehicleCategory) -> String {
        let catalog = self.allocator.catalog();
        let Some(floors) = catalog.floors(category) else {
            return unknown_category(category);
        };
        let occupied = self.allocator.snapshot().await;

        let mut out = format!("{category} slots:");
        for floor in floors {
            let slots: Vec<String> = floor
                .slots
                .iter()
                .map(|slot| {
                    if occupied.is_occupied(slot) {
                        format!("{slot} (occupied)")
                    } else {
                        slot.to_string()
                    }
                })
                .collect();
            let _ = write!(out, "\n  {}: {}", floor.floor, slots.join(", "));
        }
        out
    }

    async fn status(&self) -> String {
        let mut out = String::new();
        for availability in self.allocator.availability().await {
            let _ = writeln!(
                out,
                "{}: {} free, {} occupied of {}",
                availability.category, availability.free, availability.occupied, availability.total
            );
        }
        let broker = match self.session.as_ref().map(BrokerClient::state) {
            None => "unknown".to_string(),
            Some(state) => describe_session(&state),
        };
        let _ = write!(out, "broker: {broker}");
        out
    }

    /// Serve commands from `input` until `quit` or end of input.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let reply = match Command::parse(&line) {
                Ok(None) => continue,
                Ok(Some(command)) => self.execute(command).await,
                Err(err) => Reply::Text(err.to_string()),
            };
            match reply {
                Reply::Text(text) => {
                    output.write_all(text.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
                Reply::Quit => break,
            }
        }
        Ok(())
    }
}

fn unknown_category(category: &VehicleCategory) -> String {
    format!("Unknown vehicle type: {category}")
}

/// Human-readable session state, shared with the status board.
pub fn describe_session(state: &SessionState) -> String {
    match state {
        SessionState::Connecting => "connecting".to_string(),
        SessionState::Connected => "connected".to_string(),
        SessionState::Reconnecting { attempt: 0 } => {
            "disconnected, attempting to reconnect".to_string()
        }
        SessionState::Reconnecting { attempt } => {
            format!("disconnected, attempting to reconnect (attempt {attempt})")
        }
        SessionState::Closed => "closed".to_string(),
    }
}
