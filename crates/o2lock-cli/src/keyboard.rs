//! Keys of the live display.
//!
//! `d` switches between the summary and the per-node breakdown. `q` or
//! Ctrl-C stops the monitor after the current cycle. Keys are only read
//! when both stdin and stdout are a terminal.

use std::io::{self, IsTerminal};
use std::sync::mpsc::SyncSender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::{cursor, execute, terminal};

use o2lock_core::Shutdown;

use crate::printer::PrinterEvent;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Terminals narrower than this get half of their rows.
const WIDE_COLUMNS: u16 = 93;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    ToggleDetailed,
}

pub fn key_action(key: KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(KeyAction::Quit),
        KeyCode::Char('q' | 'Q') => Some(KeyAction::Quit),
        KeyCode::Char('d' | 'D') => Some(KeyAction::ToggleDetailed),
        _ => None,
    }
}

/// Report rows that fit a `columns` x `rows` terminal next to the headers.
pub fn rows_for_terminal(columns: u16, rows: u16) -> usize {
    let rows = usize::from(rows);
    let fit = if columns < WIDE_COLUMNS {
        (rows / 2).saturating_sub(4)
    } else {
        rows.saturating_sub(6)
    };
    fit.max(1)
}

/// Report rows for the attached terminal, if stdout is one.
pub fn terminal_rows() -> Option<usize> {
    if !io::stdout().is_terminal() {
        return None;
    }
    match terminal::size() {
        Ok((columns, rows)) => Some(rows_for_terminal(columns, rows)),
        Err(e) => {
            tracing::debug!(error = %e, "terminal size unavailable");
            None
        }
    }
}

pub fn is_interactive() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// Raw mode with a hidden cursor, restored on drop.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        if let Err(e) = execute!(io::stdout(), cursor::Hide) {
            tracing::debug!(error = %e, "failed to hide cursor");
        }
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = execute!(io::stdout(), cursor::Show) {
            tracing::debug!(error = %e, "failed to show cursor");
        }
        if let Err(e) = terminal::disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Read keys until `shutdown` is requested. The thread holds a printer
/// sender, so it must be joined before the printer.
pub fn spawn(shutdown: &Shutdown, events: SyncSender<PrinterEvent>) -> io::Result<JoinHandle<()>> {
    let shutdown = shutdown.clone();
    thread::Builder::new().name("keyboard".into()).spawn(move || {
        let _raw = match RawMode::enable() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "keyboard input unavailable");
                return;
            }
        };

        while !shutdown.is_requested() {
            match next_action() {
                Ok(Some(KeyAction::Quit)) => {
                    tracing::info!("stop requested from keyboard");
                    shutdown.request();
                }
                Ok(Some(KeyAction::ToggleDetailed)) => {
                    if events.send(PrinterEvent::ToggleDetailed).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read keyboard input");
                    return;
                }
            }
        }
    })
}

fn next_action() -> io::Result<Option<KeyAction>> {
    if !event::poll(POLL_INTERVAL)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) => Ok(key_action(key)),
        _ => Ok(None),
    }
}
