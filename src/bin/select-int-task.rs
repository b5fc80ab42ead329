//! Terminal front end for the selective interrogation task.
//!
//! Grid labels are numbered; type a number (or the label itself) to open
//! it, press Enter on any other screen to continue, `q` to quit.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

use select_int_task::storage::{CsvRawLog, CsvSummaryStore};
use select_int_task::{Action, Result, Screen, Session, Surface, TaskConfig};

struct Console<R: BufRead, W: Write> {
    input: R,
    output: W,
    /// Labels of the grid on screen, by printed number.
    labels: Vec<String>,
}

impl<R: BufRead, W: Write> Console<R, W> {
    fn new(input: R, output: W) -> Self {
        Self { input, output, labels: Vec::new() }
    }

    fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl<R: BufRead, W: Write> Surface for Console<R, W> {
    fn render(&mut self, screen: &Screen<'_>) -> Result<()> {
        self.labels.clear();
        let out = &mut self.output;
        writeln!(out)?;
        match screen {
            Screen::Intro { title, body, button } => {
                writeln!(out, "{title}\n\n{body}\n\n[Enter] {button}")?;
            }
            Screen::Grid { prompt, grid, .. } => {
                writeln!(out, "{prompt}  (grid {})", grid.index)?;
                for cell in grid.unselected() {
                    self.labels.push(cell.stimulus.label.clone());
                    writeln!(
                        out,
                        "  {:>2}. [r{} c{}] {}",
                        self.labels.len(),
                        cell.position.row + 1,
                        cell.position.column + 1,
                        cell.stimulus.label
                    )?;
                }
            }
            Screen::Content { content, button } => {
                writeln!(out, "{content}\n\n[Enter] {button}")?;
            }
            Screen::Error { message, button } => {
                writeln!(out, "{message}\n\n[Enter] {button}")?;
            }
            Screen::End => {}
        }
        out.flush()?;
        Ok(())
    }

    fn next_action(&mut self) -> Option<Action> {
        let line = self.read_line()?;
        Some(match line.as_str() {
            "q" | "Q" => Action::Quit,
            "" => Action::Confirm,
            text => match text.parse::<usize>() {
                Ok(n) if (1..=self.labels.len()).contains(&n) => {
                    Action::Select(self.labels[n - 1].clone())
                }
                _ => Action::Select(text.to_string()),
            },
        })
    }

    fn announce(&mut self, text: &str, duration: Duration) -> Result<()> {
        writeln!(self.output, "\n*** {text} ***")?;
        self.output.flush()?;
        thread::sleep(duration);
        Ok(())
    }
}

fn parse_seed() -> Option<u64> {
    let args: Vec<String> = std::env::args().collect();
    let mut seed = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--seed" => {
                i += 1;
                if i < args.len() {
                    seed = Some(args[i].parse().unwrap_or_else(|_| {
                        eprintln!("Invalid --seed value: {}", args[i]);
                        std::process::exit(1);
                    }));
                }
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    seed
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let seed = parse_seed();
    let config = TaskConfig::from_env().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let summary = CsvSummaryStore::new(&config.summary_path);
    let raw = CsvRawLog::new(&config.raw_log_path);
    let mut session = match seed {
        Some(seed) => {
            Session::open_with_rng(config, summary, raw, &mut StdRng::seed_from_u64(seed))
        }
        None => Session::open(config, summary, raw),
    };

    let stdin = io::stdin();
    let mut console = Console::new(stdin.lock(), io::stdout());
    if let Err(e) = session.run(&mut console) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
