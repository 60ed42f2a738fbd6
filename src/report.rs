//! Console rendering of engine events
use crate::dispatch::EventHandler;
use crate::engine::{HeaderColumn, LocatorItem, Progress, SearchEvent, SolutionEvent};
use crate::fs_host::IconLabel;
use clap::ValueEnum;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    /// One JSON object per engine event.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// How a search ended, as seen by the reporter.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchSummary {
    Finished { results: usize, elapsed: Duration },
    Canceled { results: usize },
    Failed(String),
}

/// Writes search results as they stream in.
pub struct ConsoleReporter<W: Write> {
    out: W,
    format: OutputFormat,
    show_progress: bool,
    show_summary: bool,
    progress: Option<ProgressBar>,
    results: usize,
    started: Instant,
    summary: Option<SearchSummary>,
    write_error: Option<io::Error>,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            show_progress: false,
            show_summary: true,
            progress: None,
            results: 0,
            started: Instant::now(),
            summary: None,
            write_error: None,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_summary(mut self, show: bool) -> Self {
        self.show_summary = show;
        self
    }

    /// Reset per-search state before a new query is sent.
    pub fn begin(&mut self, query: &str) {
        self.finish_progress();
        self.results = 0;
        self.summary = None;
        self.started = Instant::now();
        info!("Searching for '{query}'");

        if self.show_progress && self.format == OutputFormat::Text {
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}% {msg}",
            )
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            let bar = ProgressBar::new(100).with_style(style);
            bar.set_message(query.to_string());
            self.progress = Some(bar);
        }
    }

    pub fn is_done(&self) -> bool {
        self.summary.is_some()
    }

    pub fn summary(&self) -> Option<&SearchSummary> {
        self.summary.as_ref()
    }

    pub fn results(&self) -> usize {
        self.results
    }

    /// First write failure, if any. Output stops being produced after it.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.write_error.take()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        if self.write_error.is_some() {
            return;
        }
        let written = match &self.progress {
            Some(bar) => {
                let mut buf = Vec::new();
                let result = writeln!(buf, "{text}");
                bar.suspend(|| result.and_then(|_| self.out.write_all(&buf)))
            }
            None => writeln!(self.out, "{text}"),
        };
        if let Err(e) = written {
            warn!("Output failed: {e}");
            self.write_error = Some(e);
        }
    }

    fn json(&mut self, value: &impl serde::Serialize) {
        match serde_json::to_string(value) {
            Ok(text) => self.line(&text),
            Err(e) => warn!("Failed to serialize event: {e}"),
        }
    }

    fn header(&mut self, columns: &[HeaderColumn]) {
        let titles: Vec<String> = columns
            .iter()
            .map(|c| c.title.bold().underline().to_string())
            .collect();
        self.line(&titles.join("  "));
    }

    fn item(&mut self, item: &LocatorItem) {
        let text = match item {
            LocatorItem::File(file) => {
                let label = file
                    .image
                    .as_ref()
                    .and_then(|image| image.downcast_ref::<IconLabel>())
                    .map_or("file", |label| label.0);
                format!(
                    "{} {}  {}",
                    format!("[{label}]").dimmed(),
                    file.name.green(),
                    file.relative_path.cyan()
                )
            }
            LocatorItem::Declaration(symbol) => {
                let mut text = format!(
                    "{} {}  {}",
                    format!("[{}]", symbol.kind).dimmed(),
                    symbol.name.green(),
                    symbol.full_name.cyan()
                );
                if !symbol.comment.is_empty() {
                    let first = symbol.comment.lines().next().unwrap_or_default();
                    text.push_str(&format!("  {}", format!("// {first}").dimmed()));
                }
                text
            }
        };
        self.line(&text);
    }

    fn progress(&mut self, progress: Progress) {
        if let Some(bar) = &self.progress {
            match progress {
                Progress::Percent(p) => bar.set_position(u64::from(p)),
                Progress::Indeterminate => bar.tick(),
            }
        }
    }

    fn finish_progress(&mut self) {
        if let Some(bar) = self.progress.take() {
            bar.finish_and_clear();
        }
    }

    fn finish(&mut self, summary: SearchSummary) {
        self.finish_progress();
        if self.format == OutputFormat::Text && self.show_summary {
            let text = match &summary {
                SearchSummary::Finished { results: 0, .. } => "No matches found".yellow().to_string(),
                SearchSummary::Finished { results, elapsed } => format!(
                    "{} {} {} {}",
                    "Found".green(),
                    results,
                    "results in".green(),
                    format!("{}ms", elapsed.as_millis()).cyan()
                ),
                SearchSummary::Canceled { results } => {
                    format!("{} ({results} shown)", "Search canceled".yellow())
                }
                SearchSummary::Failed(reason) => format!("{} {reason}", "Search failed:".red()),
            };
            self.line(&text);
        }
        self.summary = Some(summary);
    }
}

impl<W: Write> EventHandler for ConsoleReporter<W> {
    fn on_search_event(&mut self, event: SearchEvent) {
        if self.format == OutputFormat::Json {
            self.json(&event);
        }

        match event {
            SearchEvent::HeaderData(columns) => {
                if self.format == OutputFormat::Text {
                    self.header(&columns);
                }
            }
            SearchEvent::Data(items) => {
                self.results += items.len();
                if self.format == OutputFormat::Text {
                    for item in &items {
                        self.item(item);
                    }
                }
            }
            SearchEvent::Progress(progress) => self.progress(progress),
            SearchEvent::Canceled => self.finish(SearchSummary::Canceled {
                results: self.results,
            }),
            SearchEvent::Error(e) => self.finish(SearchSummary::Failed(e.to_string())),
            SearchEvent::Finished => self.finish(SearchSummary::Finished {
                results: self.results,
                elapsed: self.started.elapsed(),
            }),
        }
    }

    fn on_solution_event(&mut self, event: SolutionEvent) {
        info!("{event}");
        match self.format {
            OutputFormat::Json => self.json(&event),
            OutputFormat::Text => {
                if let Some(bar) = &self.progress {
                    bar.set_message(event.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{DeclarationSymbol, SymbolKind, SymbolLocator};
    use crate::engine::{SearchError, FILE_COLUMNS};
    use crate::project::IndexedFile;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn file(name: &str) -> LocatorItem {
        LocatorItem::File(Arc::new(IndexedFile::new(
            1,
            name.to_string(),
            PathBuf::from("/p/src").join(name),
            Path::new("/p"),
        )))
    }

    fn output(reporter: ConsoleReporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn test_text_output_and_summary() {
        let mut reporter = ConsoleReporter::new(Vec::new(), OutputFormat::Text);
        reporter.begin("ta");
        reporter.on_search_event(SearchEvent::HeaderData(FILE_COLUMNS.to_vec()));
        reporter.on_search_event(SearchEvent::Data(vec![file("Beta.cpp"), file("Gamma.h")]));
        reporter.on_search_event(SearchEvent::Progress(Progress::Percent(100)));
        assert!(!reporter.is_done());
        reporter.on_search_event(SearchEvent::Finished);

        assert!(reporter.is_done());
        assert!(matches!(
            reporter.summary(),
            Some(SearchSummary::Finished { results: 2, .. })
        ));
        let text = output(reporter);
        assert!(text.contains("Beta.cpp"));
        assert!(text.contains("src/Gamma.h"));
        assert!(text.contains("Found"));
    }

    #[test]
    fn test_json_lines_per_event() {
        let mut reporter = ConsoleReporter::new(Vec::new(), OutputFormat::Json);
        reporter.begin("x");
        let symbol = DeclarationSymbol::new(
            "run()".into(),
            "App::run".into(),
            String::new(),
            SymbolKind::Function,
            SymbolLocator::Direct {
                file: PathBuf::from("/p/app.cpp"),
                offset: 12,
            },
        );
        reporter.on_search_event(SearchEvent::Data(vec![LocatorItem::Declaration(Arc::new(
            symbol,
        ))]));
        reporter.on_search_event(SearchEvent::Error(SearchError::NoProjects));

        assert_eq!(
            reporter.summary(),
            Some(&SearchSummary::Failed("no projects are indexed".into()))
        );
        let text = output(reporter);
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "data");
        assert_eq!(lines[0]["payload"][0]["type"], "declaration");
        assert_eq!(lines[0]["payload"][0]["full_name"], "App::run");
        assert_eq!(lines[1]["event"], "error");
        assert_eq!(lines[1]["payload"], "no_projects");
    }

    #[test]
    fn test_begin_resets_state() {
        let mut reporter = ConsoleReporter::new(Vec::new(), OutputFormat::Text).with_summary(false);
        reporter.begin("a");
        reporter.on_search_event(SearchEvent::Data(vec![file("a.c")]));
        reporter.on_search_event(SearchEvent::Canceled);
        assert_eq!(
            reporter.summary(),
            Some(&SearchSummary::Canceled { results: 1 })
        );

        reporter.begin("b");
        assert!(!reporter.is_done());
        assert_eq!(reporter.results(), 0);
        assert!(!output(reporter).contains("canceled"));
    }
}
