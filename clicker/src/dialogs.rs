use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceChoice {
    Exit,
    Activate,
    ForceNew,
}

/// How a lock conflict is resolved: ask, or a preset answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Ask,
    Fixed(InstanceChoice),
}

pub fn parse_conflict_policy(s: &str) -> anyhow::Result<ConflictPolicy> {
    match s {
        "ask" => Ok(ConflictPolicy::Ask),
        "exit" => Ok(ConflictPolicy::Fixed(InstanceChoice::Exit)),
        "activate" => Ok(ConflictPolicy::Fixed(InstanceChoice::Activate)),
        "force" | "force-new" => Ok(ConflictPolicy::Fixed(InstanceChoice::ForceNew)),
        other => anyhow::bail!(
            "invalid --on-conflict {}, expected ask|exit|activate|force",
            other
        ),
    }
}

pub trait Dialogs {
    fn choose_instance_action(&self, app_name: &str) -> InstanceChoice;
    fn show_error(&self, title: &str, message: &str);
    fn show_warning(&self, title: &str, message: &str);
}

pub struct TerminalDialogs {
    policy: ConflictPolicy,
}

impl TerminalDialogs {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }
}

fn parse_choice(answer: &str) -> Option<InstanceChoice> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "1" | "e" | "exit" => Some(InstanceChoice::Exit),
        "2" | "a" | "activate" => Some(InstanceChoice::Activate),
        "3" | "f" | "force" => Some(InstanceChoice::ForceNew),
        _ => None,
    }
}

/// Re-asks until a valid answer; end of input counts as Exit.
pub fn prompt_instance_action<R: BufRead, W: Write>(
    app_name: &str,
    input: &mut R,
    out: &mut W,
) -> InstanceChoice {
    let _ = writeln!(out, "{} is already running.", app_name);
    loop {
        let _ = write!(
            out,
            "  [1] Exit  [2] Activate existing  [3] Force new instance > "
        );
        let _ = out.flush();
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) | Err(_) => return InstanceChoice::Exit,
            Ok(_) => {}
        }
        if let Some(choice) = parse_choice(&line) {
            return choice;
        }
        let _ = writeln!(out, "Please answer 1, 2 or 3.");
    }
}

impl Dialogs for TerminalDialogs {
    fn choose_instance_action(&self, app_name: &str) -> InstanceChoice {
        match self.policy {
            ConflictPolicy::Fixed(c) => c,
            ConflictPolicy::Ask => {
                let stdin = io::stdin();
                prompt_instance_action(app_name, &mut stdin.lock(), &mut io::stderr())
            }
        }
    }

    fn show_error(&self, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }

    fn show_warning(&self, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }
}
