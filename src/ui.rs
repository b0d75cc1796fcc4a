use std::io;
use std::time::{Duration, Instant};

use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, MouseButton, MouseEvent, MouseEventKind,
};
use ratatui::{
    backend::Backend,
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tracing::debug;

use crate::drag::DragMachine;
use crate::kanban_board::KanbanBoard;
use crate::storage::StorageBackend;
use crate::task::{Task, TaskStatus};

const NOTICE_TTL: Duration = Duration::from_secs(4);
const HELP: &str =
    "a add  d delete  ←/→ column  ↑/↓ task  </> move  mouse drag  C clear all  q quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    Delete { id: String, title: String },
    ClearAll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Title,
    Description { title: String },
    Confirm(ConfirmAction),
}

struct Notice {
    text: String,
    expires: Instant,
}

pub struct App<S> {
    pub board: KanbanBoard<S>,
    pub drag: DragMachine,
    pub mode: Mode,
    pub input: String,
    pub should_quit: bool,
    column_areas: [Rect; 3],
    notice: Option<Notice>,
}

impl<S: StorageBackend> App<S> {
    pub fn new(board: KanbanBoard<S>) -> Self {
        let mut app = Self {
            board,
            drag: DragMachine::new(),
            mode: Mode::Normal,
            input: String::new(),
            should_quit: false,
            column_areas: [Rect::default(); 3],
            notice: None,
        };
        app.collect_warning();
        app
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_ref().map(|n| n.text.as_str())
    }

    fn notify(&mut self, text: impl Into<String>) {
        self.notice = Some(Notice {
            text: text.into(),
            expires: Instant::now() + NOTICE_TTL,
        });
    }

    fn collect_warning(&mut self) {
        if let Some(warning) = self.board.take_warning() {
            self.notify(warning);
        }
    }

    /// Drops the notice once it has been on screen long enough.
    pub fn tick(&mut self) {
        if self
            .notice
            .as_ref()
            .is_some_and(|n| Instant::now() >= n.expires)
        {
            self.notice = None;
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::Normal => self.handle_normal_key(key),
            Mode::Title => self.handle_title_key(key),
            Mode::Description { title } => self.handle_description_key(key, title),
            Mode::Confirm(action) => self.handle_confirm_key(key, action),
        }
        self.collect_warning();
    }

    fn handle_normal_key(&mut self, key: KeyEvent) {
        let statuses = TaskStatus::ALL.len();
        match key.code {
            KeyCode::Char('q') => {
                self.drag.drag_end();
                self.should_quit = true;
            }
            KeyCode::Char('a') => {
                self.input.clear();
                self.mode = Mode::Title;
            }
            KeyCode::Left | KeyCode::Char('h') => {
                if self.board.selected_status > 0 {
                    self.board.selected_status -= 1;
                    self.board.selected_task = 0;
                }
            }
            KeyCode::Right | KeyCode::Char('l') => {
                if self.board.selected_status < statuses - 1 {
                    self.board.selected_status += 1;
                    self.board.selected_task = 0;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.board.selected_task = self.board.selected_task.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let max_tasks = TaskStatus::from_index(self.board.selected_status)
                    .map_or(0, |s| self.board.get_tasks_by_status(s).len());
                if self.board.selected_task + 1 < max_tasks {
                    self.board.selected_task += 1;
                }
            }
            KeyCode::Enter | KeyCode::Char('>') => self.move_selected(1),
            KeyCode::Char('<') => self.move_selected(-1),
            KeyCode::Char('d') => {
                if let Some(task) = self.board.selected() {
                    self.mode = Mode::Confirm(ConfirmAction::Delete {
                        id: task.id.clone(),
                        title: task.title.clone(),
                    });
                }
            }
            KeyCode::Char('C') => {
                if !self.board.tasks().is_empty() {
                    self.mode = Mode::Confirm(ConfirmAction::ClearAll);
                }
            }
            KeyCode::Esc => self.drag.drag_end(),
            _ => {}
        }
    }

    fn handle_title_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.input.clear(),
            KeyCode::Enter => {
                if self.input.trim().is_empty() {
                    self.notify("Task title cannot be empty");
                    self.mode = Mode::Title;
                } else {
                    let title = std::mem::take(&mut self.input);
                    self.mode = Mode::Description { title };
                }
            }
            code => {
                edit_input(&mut self.input, code);
                self.mode = Mode::Title;
            }
        }
    }

    fn handle_description_key(&mut self, key: KeyEvent, title: String) {
        match key.code {
            KeyCode::Esc => self.input.clear(),
            KeyCode::Enter => {
                let description = std::mem::take(&mut self.input);
                if let Some(task) = self.board.add_task(&title, &description) {
                    let text = format!("Added \"{}\"", task.title);
                    self.board.selected_status = TaskStatus::Todo.index();
                    self.board.selected_task =
                        self.board.get_tasks_by_status(TaskStatus::Todo).len() - 1;
                    self.notify(text);
                }
            }
            code => {
                edit_input(&mut self.input, code);
                self.mode = Mode::Description { title };
            }
        }
    }

    fn handle_confirm_key(&mut self, key: KeyEvent, action: ConfirmAction) {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => match action {
                ConfirmAction::Delete { id, title } => {
                    if self.board.delete_task(&id) {
                        self.notify(format!("Deleted \"{title}\""));
                    }
                }
                ConfirmAction::ClearAll => {
                    self.board.clear_all();
                    self.notify("All tasks cleared");
                }
            },
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {}
            _ => self.mode = Mode::Confirm(action),
        }
    }

    /// Translates terminal mouse events into drag machine transitions.
    pub fn handle_mouse(&mut self, mouse: MouseEvent) {
        let position = Position::new(mouse.column, mouse.row);
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) if self.mode == Mode::Normal => {
                let Some(column) = self.column_at(position) else {
                    return;
                };
                let Some((index, task)) = self
                    .task_at(column, position)
                    .map(|(index, task)| (index, task.clone()))
                else {
                    return;
                };
                self.board.selected_status = column.index();
                self.board.selected_task = index;
                self.drag.drag_start(&task);
            }
            MouseEventKind::Drag(MouseButton::Left) if self.drag.is_dragging() => {
                let over = self.column_at(position);
                let current = self.drag.highlighted_column();
                if over != current {
                    if let Some(column) = current {
                        self.drag.drag_leave(column);
                    }
                    if let Some(column) = over {
                        self.drag.drag_enter(column);
                    }
                }
            }
            MouseEventKind::Up(MouseButton::Left) if self.drag.is_dragging() => {
                match self.column_at(position) {
                    Some(column) => {
                        if let Some(change) = self.drag.drop(column, None) {
                            let task_id = change.task_id.clone();
                            if self.board.apply(change) {
                                self.select_task(&task_id);
                            }
                        }
                    }
                    None => self.drag.drag_end(),
                }
            }
            _ => {}
        }
        self.collect_warning();
    }

    /// Keyboard counterpart of a drag; the selection follows the task.
    fn move_selected(&mut self, direction: isize) {
        let Some(id) = self.board.selected().map(|t| t.id.clone()) else {
            return;
        };
        if self.board.move_task(direction) {
            self.select_task(&id);
        }
    }

    fn select_task(&mut self, task_id: &str) {
        let Some(status) = self.board.task(task_id).map(|t| t.status) else {
            return;
        };
        let index = self
            .board
            .get_tasks_by_status(status)
            .iter()
            .position(|t| t.id == task_id)
            .unwrap_or(0);
        self.board.selected_status = status.index();
        self.board.selected_task = index;
    }

    fn column_at(&self, position: Position) -> Option<TaskStatus> {
        self.column_areas
            .iter()
            .position(|area| area.contains(position))
            .and_then(TaskStatus::from_index)
    }

    fn task_at(&self, column: TaskStatus, position: Position) -> Option<(usize, &Task)> {
        let area = self.column_areas[column.index()];
        // First row inside the border; the bottom border row holds no task.
        let index = position.y.checked_sub(area.y + 1)?;
        if index >= area.height.saturating_sub(2) {
            return None;
        }
        let index = index as usize;
        self.board
            .get_tasks_by_status(column)
            .get(index)
            .map(|task| (index, *task))
    }

    pub fn draw(&mut self, f: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(3)])
            .split(f.area());
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(vec![
                Constraint::Percentage(33),
                Constraint::Percentage(33),
                Constraint::Percentage(34),
            ])
            .split(rows[0]);

        let dragged = self.drag.dragged_task_id();
        let highlighted = self.drag.highlighted_column();

        for (i, status) in TaskStatus::ALL.iter().enumerate() {
            let tasks = self.board.get_tasks_by_status(*status);
            let items: Vec<ListItem> = tasks
                .iter()
                .enumerate()
                .map(|(row, t)| {
                    let selected = self.board.selected_status == i && self.board.selected_task == row;
                    let title_style = if dragged == Some(t.id.as_str()) {
                        Style::default()
                            .fg(Color::DarkGray)
                            .add_modifier(Modifier::ITALIC)
                    } else if selected {
                        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
                    } else {
                        Style::default().fg(Color::White)
                    };
                    let mut spans = vec![
                        Span::raw(if selected { "> " } else { "  " }),
                        Span::styled(t.title.as_str(), title_style),
                    ];
                    if !t.description.is_empty() {
                        spans.push(Span::styled(
                            format!(" - {}", t.description),
                            Style::default().fg(Color::Gray),
                        ));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect();

            let border_style = if highlighted == Some(*status) {
                Style::default().fg(Color::Yellow)
            } else if self.board.selected_status == i {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            };
            let list = List::new(items).block(
                Block::default()
                    .title(format!("{} ({})", status.label(), tasks.len()))
                    .borders(Borders::ALL)
                    .border_style(border_style),
            );

            f.render_widget(list, chunks[i]);
        }

        for (slot, area) in self.column_areas.iter_mut().zip(chunks.iter()) {
            *slot = *area;
        }

        f.render_widget(self.footer(), rows[1]);
    }

    fn footer(&self) -> Paragraph<'_> {
        let text = match &self.mode {
            Mode::Title => format!("New task title: {}_", self.input),
            Mode::Description { title } => format!("Description for \"{title}\": {}_", self.input),
            Mode::Confirm(ConfirmAction::Delete { title, .. }) => {
                format!("Delete \"{title}\"? (y/n)")
            }
            Mode::Confirm(ConfirmAction::ClearAll) => {
                "Delete ALL tasks? This cannot be undone. (y/n)".to_string()
            }
            Mode::Normal => self
                .notice()
                .map_or_else(|| HELP.to_string(), str::to_string),
        };
        let storage = if self.board.storage_available() {
            format!(" storage {:.1}% ", self.board.stats().percentage)
        } else {
            " storage unavailable ".to_string()
        };
        Paragraph::new(text).block(Block::default().title(storage).borders(Borders::ALL))
    }
}

fn edit_input(input: &mut String, code: KeyCode) {
    match code {
        KeyCode::Char(c) => input.push(c),
        KeyCode::Backspace => {
            input.pop();
        }
        _ => {}
    }
}

pub fn run_app<B: Backend, S: StorageBackend>(
    terminal: &mut Terminal<B>,
    app: &mut App<S>,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| app.draw(f))?;

        if event::poll(Duration::from_millis(250))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => app.handle_key(key),
                Event::Mouse(mouse) => app.handle_mouse(mouse),
                Event::FocusLost => app.drag.drag_end(),
                _ => {}
            }
        }
        app.tick();

        if app.should_quit {
            debug!("leaving board");
            return Ok(());
        }
    }
}
