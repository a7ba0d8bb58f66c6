use std::io::Write;

use super::event::NotificationEvent;

/// Writes every notification to the terminal as soon as it is raised.
///
/// Every severity goes to stdout. Each line is written while holding the
/// stream lock so concurrent notifications never interleave.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn write(&self, event: &NotificationEvent) {
        // a closed terminal must not take the watchdog down with it
        let _ = write_line(std::io::stdout().lock(), event);
    }
}

fn write_line(mut out: impl Write, event: &NotificationEvent) -> std::io::Result<()> {
    writeln!(out, "{}", format_line(event))
}

fn format_line(event: &NotificationEvent) -> String {
    format!(
        "[{}] [{}] [{}] {}",
        event.formatted_timestamp(),
        event.severity.label(),
        event.channel,
        event.message
    )
}
