use crate::dispatch::Dispatcher;
use blade_protocol::{Command, StatusReport};
use log::debug;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};

/// Adapter between a transport and the dispatcher. Knows how requests are
/// shaped, nothing about the servo.
#[derive(Clone)]
pub struct ControlChannel {
    dispatcher: Dispatcher,
}

impl ControlChannel {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn submit_command(&self, name: &str, params: &HashMap<String, String>) -> String {
        self.dispatcher.handle(name, params)
    }

    /// Run the command named in a URL query such as
    /// `start_loop=Start+Loop&retract=10&speed=20`. Returns `None` when the
    /// query names no known command.
    pub fn submit_query(&self, query: &str) -> Option<String> {
        let params = parse_query(query);
        let command = Command::ALL
            .into_iter()
            .find(|cmd| params.contains_key(cmd.as_str()))?;
        debug!("Query '{}' -> {}", query, command.as_str());
        Some(self.submit_command(command.as_str(), &params))
    }

    /// Status text for a plain page load.
    pub fn status(&self) -> String {
        self.dispatcher.status()
    }

    pub fn report(&self) -> StatusReport {
        self.dispatcher.controller().snapshot()
    }

    /// Line console used by the host simulator: one query per line (a
    /// leading `/?` or `?` is ignored), one status line back. Returns at
    /// end of input or on `quit`.
    pub fn serve_lines<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<()> {
        writeln!(output, "{}", self.status())?;
        for line in input.lines() {
            let line = line?;
            let query = line.trim().trim_start_matches("/?").trim_start_matches('?');
            if query == "quit" {
                break;
            }
            let status = self.submit_query(query).unwrap_or_else(|| self.status());
            let report = self.report();
            writeln!(
                output,
                "{} [angle {}°, center {}°]",
                status, report.current_angle, report.calibrated_angle
            )?;
        }
        Ok(())
    }
}

/// Split `k=v&k2=v2` into a flat map. Keys without `=` map to an empty
/// value; later duplicates win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
