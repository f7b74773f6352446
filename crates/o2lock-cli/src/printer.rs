//! Terminal output of the reports.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::mpsc::{Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use o2lock_core::{Report, ReportSink};

const CLEAR_SCREEN: &str = "\x1B[2J\x1B[1;1H";

#[derive(Debug)]
pub enum PrinterEvent {
    Report(Report),
    /// Switch between summary and detailed rows and redraw.
    ToggleDetailed,
}

/// Coordinator side of the printer channel.
#[derive(Debug, Clone)]
pub struct PrinterFeed(pub SyncSender<PrinterEvent>);

impl ReportSink for PrinterFeed {
    fn publish(&mut self, report: Report) -> bool {
        self.0.send(PrinterEvent::Report(report)).is_ok()
    }
}

/// Writes every report to stdout and, optionally, to a log file.
#[derive(Debug)]
pub struct Printer {
    prelude: String,
    detailed: bool,
    clear: bool,
    raw: bool,
    log: Option<File>,
    last: Option<Report>,
}

impl Printer {
    pub fn new(prelude: String, detailed: bool, clear: bool) -> Self {
        Self {
            prelude,
            detailed,
            clear,
            raw: false,
            log: None,
            last: None,
        }
    }

    /// Terminal is in raw mode; lines need an explicit carriage return.
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Append every report to `path` as well.
    pub fn with_log(mut self, path: &Path) -> io::Result<Self> {
        self.log = Some(OpenOptions::new().create(true).append(true).open(path)?);
        Ok(self)
    }

    /// Text of one screen, without terminal control sequences.
    pub fn render(&self, report: &Report) -> String {
        format!("{}\n{}\n", self.prelude, report.text(self.detailed))
    }

    pub fn print(&mut self, report: &Report, out: &mut impl Write) -> io::Result<()> {
        self.draw(report, out)?;
        let text = self.render(report);
        if let Some(log) = &mut self.log {
            writeln!(log, "{text}")?;
        }
        Ok(())
    }

    fn draw(&self, report: &Report, out: &mut impl Write) -> io::Result<()> {
        let text = self.render(report);
        if self.clear {
            out.write_all(CLEAR_SCREEN.as_bytes())?;
        }
        if self.raw {
            out.write_all(text.replace('\n', "\r\n").as_bytes())?;
        } else {
            out.write_all(text.as_bytes())?;
        }
        out.flush()
    }

    /// Apply one event. A toggle redraws the last report without logging it.
    pub fn handle(&mut self, event: PrinterEvent, out: &mut impl Write) -> io::Result<()> {
        match event {
            PrinterEvent::Report(report) => {
                self.print(&report, out)?;
                self.last = Some(report);
            }
            PrinterEvent::ToggleDetailed => {
                self.detailed = !self.detailed;
                tracing::debug!(detailed = self.detailed, "display mode switched");
                if let Some(report) = &self.last {
                    self.draw(report, out)?;
                }
            }
        }
        Ok(())
    }

    /// Print until every sender goes away or output fails. Dropping the
    /// receiver on failure stops the coordinator.
    pub fn spawn(mut self, events: Receiver<PrinterEvent>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name("printer".into()).spawn(move || {
            let stdout = io::stdout();
            for event in events {
                if let Err(e) = self.handle(event, &mut stdout.lock()) {
                    tracing::error!(error = %e, "failed to write report");
                    return;
                }
            }
        })
    }
}
