//! Line-oriented terminal picker.
//!
//! Candidates are printed as a numbered list; the user answers with index
//! lists (`1,3`), an empty line to accept the current selection, `=expr` for
//! a manual filter override, `b` to go back, or `q` to cancel. Discovery
//! updates arriving while the prompt is open are announced as they land.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use pcapsift_engine::{
    WizardError,
    adapters::{Picker, PickerSession},
};
use pcapsift_types::{PickItem, PickOutcome, PickerRequest, PickerUpdate, StepSelection};

/// Picker reading selections from standard input.
#[derive(Debug, Default, Clone)]
pub struct StdioPicker;

pub struct StdioPickerSession {
    title: String,
    step_index: usize,
    total_steps: usize,
    items: Vec<PickItem>,
    selected: Vec<String>,
    announced: usize,
    rendered: bool,
    lines: Lines<BufReader<Stdin>>,
}

impl Picker for StdioPicker {
    type Session = StdioPickerSession;

    fn open(&mut self, request: PickerRequest) -> Result<StdioPickerSession, WizardError> {
        Ok(StdioPickerSession {
            title: request.title,
            step_index: request.step_index,
            total_steps: request.total_steps,
            items: Vec::new(),
            selected: Vec::new(),
            announced: 0,
            rendered: false,
            lines: BufReader::new(tokio::io::stdin()).lines(),
        })
    }
}

#[async_trait]
impl PickerSession for StdioPickerSession {
    fn apply(&mut self, update: PickerUpdate) {
        match update {
            PickerUpdate::Items(items) => {
                self.items = items;
                if self.rendered && self.items.len() > self.announced {
                    for item in &self.items[self.announced..] {
                        println!("  + discovered {}", render_item(item));
                    }
                }
                self.announced = self.items.len();
            }
            PickerUpdate::Selected(keys) => self.selected = keys,
            PickerUpdate::Busy(busy) => {
                if self.rendered {
                    if busy {
                        println!("  (scanning capture in the background...)");
                    } else {
                        println!("  (scan complete; enter 'l' to list all candidates)");
                    }
                }
            }
        }
    }

    fn selected_keys(&self) -> Vec<String> {
        self.selected.clone()
    }

    async fn resolve(&mut self) -> PickOutcome {
        loop {
            if !self.rendered {
                self.render();
                self.rendered = true;
            }
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(outcome) = self.interpret(line.trim()) {
                        return outcome;
                    }
                }
                Ok(None) | Err(_) => return PickOutcome::Cancelled,
            }
        }
    }
}

impl StdioPickerSession {
    fn render(&self) {
        println!();
        println!("step {}/{}: {}", self.step_index, self.total_steps, self.title);
        for (index, item) in self.items.iter().enumerate() {
            let marker = if self.selected.contains(&item.name) { "x" } else { " " };
            println!("  [{marker}] {:>3}. {}", index + 1, render_item(item));
        }
        println!("  indices to select (e.g. 1,3), enter = accept marked, =expr = manual filter, b = back, q = quit");
    }

    /// Interpret one input line; `None` re-prompts.
    fn interpret(&mut self, line: &str) -> Option<PickOutcome> {
        match line {
            "b" | "back" => return Some(PickOutcome::Back),
            "q" | "quit" => return Some(PickOutcome::Cancelled),
            "l" | "list" => {
                self.render();
                return None;
            }
            "" => return Some(self.confirm_selected()),
            _ => {}
        }
        if let Some(raw) = line.strip_prefix('=') {
            return Some(PickOutcome::Selected(StepSelection::Raw(raw.trim().to_string())));
        }

        match self.parse_indices(line) {
            Some(picked) => Some(PickOutcome::Selected(StepSelection::Items(picked))),
            None => {
                println!("  could not read that; enter indices like 1,3 (or b / q / =expr)");
                None
            }
        }
    }

    fn confirm_selected(&self) -> PickOutcome {
        let picked = self
            .items
            .iter()
            .filter(|item| self.selected.contains(&item.name))
            .cloned()
            .collect();
        PickOutcome::Selected(StepSelection::Items(picked))
    }

    fn parse_indices(&self, line: &str) -> Option<Vec<PickItem>> {
        let mut picked = Vec::new();
        for token in line.split([',', ' ']).filter(|t| !t.is_empty()) {
            let index: usize = token.parse().ok()?;
            let item = self.items.get(index.checked_sub(1)?)?;
            picked.push(item.clone());
        }
        Some(picked)
    }
}

fn render_item(item: &PickItem) -> String {
    let mut out = String::new();
    if let Some(icon) = &item.icon {
        out.push_str(&format!("[{icon}] "));
    }
    out.push_str(&item.name);
    if !item.description.is_empty() {
        out.push_str(&format!("  ({})", item.description));
    }
    out
}
