//! Output rendering and formatting

use crate::runner::{RunReport, UnitStatus};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, Term};
use serde::Serialize;
use std::io;
use strand_config::Config;

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    /// Use JSON output format
    json_output: bool,
    /// Terminal instance
    term: Term,
}

impl OutputRenderer {
    /// Create new output renderer
    pub fn new(json_output: bool) -> Self {
        Self {
            json_output,
            term: Term::stdout(),
        }
    }

    /// Render the outcome of `strand run`
    pub fn render_run(&self, report: &RunReport) -> io::Result<()> {
        if self.json_output {
            return Self::render_json(report);
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        table.set_header(vec![
            Cell::new("Unit").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("Thread").add_attribute(Attribute::Bold),
            Cell::new("Trace context").add_attribute(Attribute::Bold),
        ]);

        for unit in &report.units {
            let row = match &unit.status {
                UnitStatus::Completed { thread, context } => {
                    let context_cell = match context {
                        Some(context) if unit.in_trace(&report.root) => {
                            Cell::new(context.to_string()).fg(Color::Green)
                        }
                        Some(context) => Cell::new(context.to_string()).fg(Color::Yellow),
                        None => Cell::new("-"),
                    };
                    vec![
                        Cell::new(unit.index),
                        Cell::new("completed").fg(Color::Green),
                        Cell::new(thread),
                        context_cell,
                    ]
                }
                UnitStatus::Failed { error } => vec![
                    Cell::new(unit.index),
                    Cell::new("failed").fg(Color::Red),
                    Cell::new("-"),
                    Cell::new(error),
                ],
                UnitStatus::Rejected { error } => vec![
                    Cell::new(unit.index),
                    Cell::new("rejected").fg(Color::Yellow),
                    Cell::new("-"),
                    Cell::new(error),
                ],
            };
            table.add_row(row);
        }

        self.term.write_line(&table.to_string())?;

        let mode = if report.propagation {
            style("propagating").green()
        } else {
            style("not propagating").yellow()
        };
        self.term.write_line(&format!(
            "Pool {} ({mode}): trace {}, {} of {} units ran in the submitting trace",
            style(&report.pool).bold(),
            report.root,
            report.propagated(),
            report.units.len(),
        ))?;
        Ok(())
    }

    /// Render the effective configuration
    pub fn render_config(&self, config: &Config) -> io::Result<()> {
        if self.json_output {
            return Self::render_json(config);
        }
        let rendered = config.to_toml().map_err(io::Error::other)?;
        self.term.write_str(&rendered)?;
        Ok(())
    }

    /// Render as JSON
    fn render_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        println!("{json}");
        Ok(())
    }
}
