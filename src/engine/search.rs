//! File and declaration search passes run by the worker
use super::events::{
    LocatorItem, Progress, SearchError, SearchEvent, DECLARATION_COLUMNS, FILE_COLUMNS,
};
use crate::cancel::CancellationToken;
use crate::decl::{DeclarationCache, DeclarationExtractor, DeclarationSymbol};
use crate::host::Workspace;
use crate::metrics::Metrics;
use crate::project::ProjectIndex;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a piece of search text asks for. Filters are uppercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Files(String),
    Declarations(String),
}

/// Route search text to a file or declaration search.
///
/// A period followed by whitespace and a non-empty tail, as in `"Foo. bar"`,
/// selects a declaration search over the active document filtered by the
/// tail. Anything else non-empty is a file search on the whole trimmed text.
pub fn parse_query(text: &str) -> Result<Query, SearchError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SearchError::EmptyQuery);
    }

    for (i, _) in text.match_indices('.') {
        let tail = &text[i + 1..];
        if tail.starts_with(char::is_whitespace) {
            let filter = tail.trim_start();
            if !filter.is_empty() {
                return Ok(Query::Declarations(filter.to_uppercase()));
            }
        }
    }

    Ok(Query::Files(text.to_uppercase()))
}

/// Receiver of search events.
pub trait ResultSink {
    fn emit(&mut self, event: SearchEvent);
}

impl<F: FnMut(SearchEvent)> ResultSink for F {
    fn emit(&mut self, event: SearchEvent) {
        self(event)
    }
}

/// How a search pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    Canceled,
    Failed(SearchError),
}

/// Matches waiting to be delivered. Flushed once more than `timeout` has
/// passed since the previous flush.
pub struct ResultBuffer {
    items: Vec<LocatorItem>,
    last_flush: Instant,
    timeout: Duration,
}

impl ResultBuffer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            items: Vec::new(),
            last_flush: Instant::now(),
            timeout,
        }
    }

    pub fn push(&mut self, item: LocatorItem, sink: &mut dyn ResultSink) {
        self.items.push(item);
        if self.last_flush.elapsed() > self.timeout {
            self.flush(sink);
        }
    }

    pub fn flush(&mut self, sink: &mut dyn ResultSink) {
        if !self.items.is_empty() {
            sink.emit(SearchEvent::Data(std::mem::take(&mut self.items)));
        }
        self.last_flush = Instant::now();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Percent-complete reporting that only speaks up when the value changes.
pub struct ProgressTracker {
    total: usize,
    done: usize,
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            done: 0,
            last: None,
        }
    }

    pub fn advance(&mut self, sink: &mut dyn ResultSink) {
        self.done += 1;
        let percent = if self.total == 0 {
            100
        } else {
            let ratio = self.done as f64 / self.total as f64;
            (ratio * 100.0).round().min(100.0) as u8
        };
        if self.last != Some(percent) {
            self.last = Some(percent);
            sink.emit(SearchEvent::Progress(Progress::Percent(percent)));
        }
    }
}

/// Everything a search pass needs besides its inputs.
pub struct SearchContext<'a> {
    pub cache: &'a DeclarationCache,
    pub metrics: &'a Metrics,
    pub flush_timeout: Duration,
    pub cancel: &'a CancellationToken,
}

fn canceled(sink: &mut dyn ResultSink) -> Outcome {
    sink.emit(SearchEvent::Canceled);
    Outcome::Canceled
}

fn failed(sink: &mut dyn ResultSink, error: SearchError) -> Outcome {
    sink.emit(SearchEvent::Error(error));
    Outcome::Failed(error)
}

fn finished(buffer: &mut ResultBuffer, sink: &mut dyn ResultSink) -> Outcome {
    buffer.flush(sink);
    sink.emit(SearchEvent::Finished);
    Outcome::Finished
}

/// Parse `text` and run the matching search pass.
pub fn run(
    ctx: &SearchContext<'_>,
    projects: &[Arc<ProjectIndex>],
    workspace: &dyn Workspace,
    text: &str,
    sink: &mut dyn ResultSink,
) -> Outcome {
    match parse_query(text) {
        Ok(Query::Files(filter)) => search_files(ctx, projects, &filter, sink),
        Ok(Query::Declarations(filter)) => search_declarations(ctx, workspace, &filter, sink),
        Err(e) => failed(sink, e),
    }
}

/// Match `filter` against the file names of every project, in load order.
pub fn search_files(
    ctx: &SearchContext<'_>,
    projects: &[Arc<ProjectIndex>],
    filter: &str,
    sink: &mut dyn ResultSink,
) -> Outcome {
    if projects.is_empty() {
        return failed(sink, SearchError::NoProjects);
    }

    sink.emit(SearchEvent::HeaderData(FILE_COLUMNS.to_vec()));

    let total = projects.iter().map(|project| project.len()).sum();
    let mut progress = ProgressTracker::new(total);
    let mut buffer = ResultBuffer::new(ctx.flush_timeout);

    for project in projects {
        if ctx.cancel.is_cancelled() {
            return canceled(sink);
        }

        let interrupted = project.with_items(|items| {
            for file in items {
                if ctx.cancel.is_cancelled() {
                    return true;
                }
                if file.matches(filter) {
                    buffer.push(LocatorItem::File(Arc::clone(file)), sink);
                }
                progress.advance(sink);
            }
            false
        });

        if interrupted {
            debug!("File search interrupted in project '{}'", project.name());
            return canceled(sink);
        }
    }

    finished(&mut buffer, sink)
}

/// Match `filter` against the declarations of the active document.
///
/// Uses the cached declaration list when there is one; otherwise extracts
/// the document, streaming matches as they are found, and caches the full
/// list if extraction ran to completion.
pub fn search_declarations(
    ctx: &SearchContext<'_>,
    workspace: &dyn Workspace,
    filter: &str,
    sink: &mut dyn ResultSink,
) -> Outcome {
    let Some(document) = workspace.active_document() else {
        return failed(sink, SearchError::NoActiveDocument);
    };
    let Some(roots) = document.declarations.as_ref() else {
        return failed(sink, SearchError::NoDeclarationModel);
    };

    sink.emit(SearchEvent::HeaderData(DECLARATION_COLUMNS.to_vec()));
    let mut buffer = ResultBuffer::new(ctx.flush_timeout);

    if let Some(symbols) = ctx.cache.get(&document.path) {
        let mut progress = ProgressTracker::new(symbols.len());
        for symbol in symbols.iter() {
            if ctx.cancel.is_cancelled() {
                return canceled(sink);
            }
            if symbol.matches(filter) {
                buffer.push(LocatorItem::Declaration(Arc::clone(symbol)), sink);
            }
            progress.advance(sink);
        }
        return finished(&mut buffer, sink);
    }

    sink.emit(SearchEvent::Progress(Progress::Indeterminate));

    let extractor = DeclarationExtractor::new(document.path.clone(), ctx.cancel);
    let mut symbols: Vec<Arc<DeclarationSymbol>> = Vec::new();
    let result = extractor.extract_with(roots, &mut |symbol| {
        if symbol.matches(filter) {
            buffer.push(LocatorItem::Declaration(Arc::clone(&symbol)), sink);
        }
        symbols.push(symbol);
    });

    match result {
        Ok(()) => store(ctx, document.path.clone(), symbols),
        Err(e) if e.is_cancelled() => return canceled(sink),
        Err(e) => warn!(
            "Declarations of {} not cached: {e}",
            document.path.display()
        ),
    }

    finished(&mut buffer, sink)
}

/// Put a freshly extracted list into the cache and account for it.
pub fn store(
    ctx: &SearchContext<'_>,
    path: std::path::PathBuf,
    symbols: Vec<Arc<DeclarationSymbol>>,
) {
    ctx.metrics
        .declarations_extracted
        .inc_by(symbols.len() as u64);
    debug!(
        "Caching {} declarations of {}",
        symbols.len(),
        path.display()
    );
    if ctx.cache.insert(path, symbols).is_some() {
        ctx.metrics.cache_evictions.inc();
    }
}
