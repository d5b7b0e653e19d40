//! Caller side of the engine: turns outcomes into something to show.
//!
//! Nothing here returns an error. Every engine failure becomes a
//! [`Feedback::Error`] carrying the user-visible message.

use std::fmt;
use std::sync::Arc;

use crate::sync::{
	AddOutcome, ApplyOutcome, RemoveChoice, RemoveOutcome, SubscriptionEngine, SubscriptionRow,
};

/// Label of the cancel entry in the removal menu.
pub const BACK: &str = "Back";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
	Rows(Vec<SubscriptionRow>),
	Done(String),
	Warning(String),
	/// Nothing to show, e.g. ignored input or a cancelled choice.
	Nothing,
	Error(String),
}

impl Feedback {
	pub fn is_error(&self) -> bool {
		matches!(self, Feedback::Error(_))
	}
}

impl fmt::Display for Feedback {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Feedback::Rows(rows) => f.write_str(&render_table(rows)),
			Feedback::Done(msg) => write!(f, "✔ {}", msg),
			Feedback::Warning(msg) => write!(f, "⚠ {}", msg),
			Feedback::Nothing => Ok(()),
			Feedback::Error(msg) => write!(f, "✖ {}", msg),
		}
	}
}

pub struct Console {
	engine: Arc<SubscriptionEngine>,
}

impl Console {
	pub fn new(engine: Arc<SubscriptionEngine>) -> Self {
		Self { engine }
	}

	pub fn engine(&self) -> &SubscriptionEngine {
		&self.engine
	}

	pub async fn list(&self) -> Feedback {
		match self.engine.list_subscriptions().await {
			Ok(rows) => Feedback::Rows(rows),
			Err(e) => Feedback::Error(e.to_string()),
		}
	}

	pub async fn apply(&self) -> Feedback {
		match self.engine.apply_initial_subscriptions().await {
			Ok(ApplyOutcome::Applied { count }) => {
				Feedback::Done(format!("Applied {} saved subscriptions", count))
			}
			Ok(ApplyOutcome::AlreadyLive { .. } | ApplyOutcome::NothingSaved) => Feedback::Nothing,
			Err(e) => Feedback::Error(e.to_string()),
		}
	}

	pub async fn add(&self, name: &str, class: &str, filter: &str) -> Feedback {
		match self
			.engine
			.add_or_modify_subscription(name, class, filter)
			.await
		{
			Ok(AddOutcome::Saved) => Feedback::Done("Subscriptions refreshed!".to_string()),
			Ok(AddOutcome::Ignored(_)) => Feedback::Nothing,
			Err(e) => Feedback::Error(e.to_string()),
		}
	}

	pub async fn remove(&self, choice: RemoveChoice) -> Feedback {
		let name = match &choice {
			RemoveChoice::Subscription(name) => name.clone(),
			RemoveChoice::Back => String::new(),
		};

		match self.engine.remove_subscription(choice).await {
			Ok(RemoveOutcome::Removed) => Feedback::Done("Subscriptions refreshed!".to_string()),
			Ok(RemoveOutcome::Cancelled) => Feedback::Nothing,
			Ok(RemoveOutcome::NotLive) => {
				Feedback::Warning(format!("Subscription {} is not live; nothing removed", name))
			}
			Err(e) => Feedback::Error(e.to_string()),
		}
	}

	pub async fn refresh(&self) -> Feedback {
		match self.engine.refresh_subscriptions().await {
			Ok(_) => Feedback::Done("Subscriptions refreshed!".to_string()),
			Err(e) => Feedback::Error(e.to_string()),
		}
	}
}

/// Numbered removal menu: one entry per live name, then [`BACK`].
pub fn removal_menu(rows: &[SubscriptionRow]) -> Vec<String> {
	rows.iter()
		.map(|r| r.name.clone())
		.chain(std::iter::once(BACK.to_string()))
		.collect()
}

/// Interpret a menu answer: a 1-based entry number, a live name, or "back".
///
/// A live subscription that happens to be called "Back" is still reachable
/// by its name; the sentinel wins only when no name matches.
pub fn parse_removal_choice(answer: &str, rows: &[SubscriptionRow]) -> Option<RemoveChoice> {
	let answer = answer.trim();

	if let Ok(index) = answer.parse::<usize>() {
		return match index {
			0 => None,
			i if i <= rows.len() => Some(RemoveChoice::Subscription(rows[i - 1].name.clone())),
			i if i == rows.len() + 1 => Some(RemoveChoice::Back),
			_ => None,
		};
	}

	if let Some(row) = rows.iter().find(|r| r.name == answer) {
		return Some(RemoveChoice::Subscription(row.name.clone()));
	}
	if answer.eq_ignore_ascii_case(BACK) {
		return Some(RemoveChoice::Back);
	}
	None
}

/// Render rows as an aligned table with an index column.
pub fn render_table(rows: &[SubscriptionRow]) -> String {
	if rows.is_empty() {
		return "No subscriptions".to_string();
	}

	let headers = ["(index)", "Name", "Table", "Query"];
	let cells: Vec<[String; 4]> = rows
		.iter()
		.enumerate()
		.map(|(i, r)| [i.to_string(), r.name.clone(), r.table.clone(), r.query.clone()])
		.collect();

	let mut widths = headers.map(|h| h.chars().count());
	for row in &cells {
		for (w, cell) in widths.iter_mut().zip(row) {
			*w = (*w).max(cell.chars().count());
		}
	}

	let line = |values: [&str; 4]| -> String {
		let padded: Vec<String> = values
			.iter()
			.zip(widths)
			.map(|(v, w)| format!(" {:<w$} ", v, w = w))
			.collect();
		format!("│{}│", padded.join("│"))
	};
	let rule = |left: &str, mid: &str, right: &str| -> String {
		let parts: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
		format!("{}{}{}", left, parts.join(mid), right)
	};

	let mut out = Vec::with_capacity(cells.len() + 4);
	out.push(rule("┌", "┬", "┐"));
	out.push(line(headers));
	out.push(rule("├", "┼", "┤"));
	for row in &cells {
		out.push(line([row[0].as_str(), row[1].as_str(), row[2].as_str(), row[3].as_str()]));
	}
	out.push(rule("└", "┴", "┘"));
	out.join("\n")
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	fn row(name: &str) -> SubscriptionRow {
		SubscriptionRow {
			name: name.to_string(),
			table: "Task".to_string(),
			query: "done == false".to_string(),
		}
	}

	#[test]
	fn empty_table() {
		assert_eq!(render_table(&[]), "No subscriptions");
	}

	#[test]
	fn table_lists_every_row_aligned() {
		let table = render_table(&[row("open"), row("a-much-longer-name")]);
		let lines: Vec<&str> = table.lines().collect();

		assert_eq!(lines.len(), 6);
		assert!(lines[1].contains("Name"));
		assert!(lines[3].contains("open"));
		assert!(lines[4].contains("a-much-longer-name"));
		let width = lines[0].chars().count();
		assert!(lines.iter().all(|l| l.chars().count() == width));
	}

	#[test]
	fn menu_ends_with_back() {
		assert_eq!(removal_menu(&[row("a1"), row("b2")]), vec!["a1", "b2", BACK]);
		assert_eq!(removal_menu(&[]), vec![BACK]);
	}

	#[test]
	fn removal_choice_by_index_name_or_sentinel() {
		let rows = [row("open"), row("Back")];

		assert_eq!(
			parse_removal_choice("1", &rows),
			Some(RemoveChoice::Subscription("open".to_string()))
		);
		assert_eq!(parse_removal_choice("3", &rows), Some(RemoveChoice::Back));
		assert_eq!(parse_removal_choice("4", &rows), None);
		assert_eq!(parse_removal_choice("0", &rows), None);
		assert_eq!(
			parse_removal_choice(" Back ", &rows),
			Some(RemoveChoice::Subscription("Back".to_string()))
		);
		assert_eq!(parse_removal_choice("back", &[row("open")]), Some(RemoveChoice::Back));
		assert_eq!(parse_removal_choice("nope", &rows), None);
	}

	#[test]
	fn feedback_rendering() {
		assert_eq!(Feedback::Done("ok".into()).to_string(), "✔ ok");
		assert_eq!(Feedback::Nothing.to_string(), "");
		assert!(Feedback::Error("boom".into()).is_error());
		assert!(!Feedback::Warning("hm".into()).is_error());
	}
}
