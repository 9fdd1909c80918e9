//! Text rendering of the status board.

use std::fmt::Write as _;

use parking_broker::SessionState;
use parking_core::{DisplayMirror, SlotCatalog};

use crate::console::describe_session;

/// `floor1` -> `Floor1`.
fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Render every category, floor and slot of `catalog` as seen by `mirror`.
///
/// A banner line leads the board whenever the session is not connected.
pub fn render(catalog: &SlotCatalog, mirror: &DisplayMirror, session: &SessionState) -> String {
    let mut out = String::new();
    if *session != SessionState::Connected {
        let _ = writeln!(out, "[broker {}]", describe_session(session));
        out.push('\n');
    }

    for (index, category) in catalog.layout().iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "{}", capitalize(category.category.as_str()));
        for floor in &category.floors {
            let _ = writeln!(out, "{}:", capitalize(floor.floor.as_str()));
            for slot in &floor.slots {
                let status = if mirror.is_occupied(slot) {
                    "Occupied"
                } else {
                    "Available"
                };
                let _ = writeln!(out, "  Slot {slot}: {status}");
            }
        }
    }
    out
}
