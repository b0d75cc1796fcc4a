use std::{fs, io};

use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::{error, info};

use taskboard::config::{Cli, Command, Config};
use taskboard::ui::{run_app, App};
use taskboard::{logging, FileStorage, KanbanBoard, TaskStatus, TaskStore};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_cli(&cli);
    logging::init(&config.log_file)?;
    info!(data_dir = %config.data_dir.display(), "starting");

    let store = TaskStore::new(FileStorage::new(&config.data_dir));
    let mut board = KanbanBoard::open(store);

    match cli.command.unwrap_or(Command::Board) {
        Command::Board => return run_board(board),
        Command::List => list_tasks(&board),
        Command::Add { title, description } => match board.add_task(&title, &description) {
            Some(task) => println!("Added [{}] {}", task.id, task.title),
            None => return Err("task title cannot be empty".into()),
        },
        Command::Move { id, status } => {
            if board.task(&id).is_none() {
                return Err(format!("no task with id {id}").into());
            }
            if board.update_status(&id, status) {
                println!("Moved {id} to {}", status.label());
            } else {
                println!("{id} is already in {}", status.label());
            }
        }
        Command::Delete { id } => {
            if !board.delete_task(&id) {
                return Err(format!("no task with id {id}").into());
            }
            println!("Deleted {id}");
        }
        Command::Export { output } => {
            let backup = board.export()?;
            match output {
                Some(path) => {
                    let exported = backup_task_count(&backup)?;
                    fs::write(&path, backup)?;
                    println!("Exported {exported} tasks to {}", path.display());
                }
                None => println!("{backup}"),
            }
        }
        Command::Import { path } => {
            let result = board.import(&fs::read_to_string(&path)?);
            println!("{}", result.message);
            if !result.success {
                return Err("import failed".into());
            }
        }
        Command::Stats => {
            let stats = board.stats();
            println!(
                "{} of {} bytes used ({:.2}%)",
                stats.used, stats.available, stats.percentage
            );
        }
        Command::Clear { yes } => {
            if !yes {
                return Err("refusing to delete every task without --yes".into());
            }
            board.clear_all();
            println!("All tasks cleared");
        }
    }

    if let Some(warning) = board.take_warning() {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn run_board(board: KanbanBoard<FileStorage>) -> Result<(), Box<dyn std::error::Error>> {
    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(board);
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = result {
        error!(error = %err, "board loop failed");
        eprintln!("{:?}", err);
    }
    Ok(())
}

/// Number of tasks actually written into a backup document.
fn backup_task_count(backup: &str) -> serde_json::Result<usize> {
    let doc: serde_json::Value = serde_json::from_str(backup)?;
    Ok(doc["tasks"].as_array().map_or(0, Vec::len))
}

fn list_tasks(board: &KanbanBoard<FileStorage>) {
    for status in TaskStatus::ALL {
        let tasks = board.get_tasks_by_status(status);
        println!("{} ({}):", status.label(), tasks.len());
        for t in tasks {
            if t.description.is_empty() {
                println!("  [{}] {}", t.id, t.title);
            } else {
                println!("  [{}] {} - {}", t.id, t.title, t.description);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskboard::MemoryStorage;

    #[test]
    fn test_export_count_comes_from_backup() {
        let mut board = KanbanBoard::open(TaskStore::new(MemoryStorage::with_capacity(400)));
        board.add_task("Saved", "").unwrap();
        board.add_task("Unsaved", &"x".repeat(400)).unwrap();
        assert_eq!(board.tasks().len(), 2);

        let backup = board.export().unwrap();
        assert_eq!(backup_task_count(&backup).unwrap(), 1);
        assert!(backup_task_count("not json").is_err());
    }
}
