//! Line-oriented interactive session
use crate::app::LocatorApp;
use crate::error::Result;
use crate::report::ConsoleReporter;
use colored::*;
use log::info;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Open(PathBuf),
    AddProject(PathBuf),
    RemoveProject(PathBuf),
    NewFile(PathBuf),
    DeleteFile(PathBuf),
    Stats,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    /// Lines starting with `:` are commands, anything else is a query.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix(':') else {
            return Some(Command::Search(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let path = || PathBuf::from(arg);
        Some(match (name, arg.is_empty()) {
            ("q" | "quit", _) => Command::Quit,
            ("h" | "help", _) => Command::Help,
            ("stats", _) => Command::Stats,
            ("open", false) => Command::Open(path()),
            ("add", false) => Command::AddProject(path()),
            ("rm", false) => Command::RemoveProject(path()),
            ("new", false) => Command::NewFile(path()),
            ("del", false) => Command::DeleteFile(path()),
            _ => Command::Unknown(rest.to_string()),
        })
    }
}

fn print_help() {
    println!("{}", "Commands:".green().bold());
    println!("  {}  search file names", "<text>".cyan());
    println!(
        "  {}  search declarations of the active document",
        "<scope>. <text>".cyan()
    );
    println!("  {}  make FILE the active document", ":open FILE".cyan());
    println!("  {}  index DIR as a project", ":add DIR".cyan());
    println!("  {}  unload the project at DIR", ":rm DIR".cyan());
    println!("  {}  report FILE as added to its project", ":new FILE".cyan());
    println!("  {}  report FILE as deleted", ":del FILE".cyan());
    println!("  {}  show index and cache statistics", ":stats".cyan());
    println!("  {}  quit (Ctrl-C cancels a running search)", ":q".cyan());
}

fn print_stats(app: &LocatorApp) {
    let stats = app.engine().cache_stats();
    println!(
        "{}: {}",
        "Projects indexed".cyan(),
        app.engine().project_count()
    );
    println!(
        "{}: {}/{} ({} symbols)",
        "Cached documents".cyan(),
        stats.entries,
        stats.capacity,
        stats.symbols
    );
    if let Some(path) = app.workspace().active_path() {
        println!("{}: {}", "Active document".cyan(), path.display());
    }
}

fn execute<W: Write>(
    app: &mut LocatorApp,
    command: Command,
    reporter: &mut ConsoleReporter<W>,
    interrupted: &AtomicBool,
) -> Result<()> {
    match command {
        Command::Search(query) => {
            app.search(&query, reporter, SEARCH_TIMEOUT, Some(interrupted))?;
        }
        Command::Open(path) => {
            app.set_active(&path)?;
            println!("{} {}", "Active:".green(), path.display());
        }
        Command::AddProject(dir) => {
            let id = app.open_project(&dir)?;
            app.settle(reporter, SETTLE_TIMEOUT);
            println!("{} {id}", "Indexed".green());
        }
        Command::RemoveProject(dir) => match app.close_project(&dir)? {
            Some(id) => println!("{} {id}", "Unloaded".green()),
            None => println!("{}", "No project at that path".yellow()),
        },
        Command::NewFile(path) => {
            app.add_file(&path)?;
            println!("{} {}", "Added".green(), path.display());
        }
        Command::DeleteFile(path) => match app.remove_file(&path)? {
            Some(_) => println!("{} {}", "Removed".green(), path.display()),
            None => println!("{}", "Not part of any project".yellow()),
        },
        Command::Stats => {
            app.settle(reporter, SETTLE_TIMEOUT);
            print_stats(app);
        }
        Command::Help => print_help(),
        Command::Unknown(text) => {
            println!("{} :{text} (try :help)", "Unknown command".yellow());
        }
        Command::Quit => {}
    }
    Ok(())
}

/// Read commands from `input` until `:q` or end of input. Failing commands
/// are reported and the session continues.
pub fn run<R: BufRead, W: Write>(
    app: &mut LocatorApp,
    input: R,
    reporter: &mut ConsoleReporter<W>,
    interrupted: &AtomicBool,
) -> Result<()> {
    info!("Starting interactive session");
    let prompt = io::stdin().is_terminal();
    if prompt {
        print_help();
    }

    let mut lines = input.lines();
    loop {
        if prompt {
            print!("{} ", ">".green().bold());
            io::stdout().flush()?;
        }
        let Some(line) = lines.next() else {
            break;
        };
        let Some(command) = Command::parse(&line?) else {
            continue;
        };
        if command == Command::Quit {
            break;
        }
        if let Err(e) = execute(app, command, reporter, interrupted) {
            eprintln!("{} {e}", "Error:".red().bold());
        }
    }

    app.close_all();
    info!("Interactive session ended");
    Ok(())
}
