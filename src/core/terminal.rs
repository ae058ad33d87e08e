use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
pub static LOCK: Emoji<'_, '_> = Emoji("🔐 ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_step(step: &str) {
    println!("{} {}", SPARKLE, style(step).bold());
}

pub fn print_check(label: &str, ok: bool, detail: &str) {
    let mark = if ok {
        style("ok").green().bold()
    } else {
        style("FAILED").red().bold()
    };
    println!("  {:<10} {}  {}", style(label).bold(), mark, style(detail).dim());
}

/// Print a SQL script between rulers so it can be copied as-is.
pub fn print_sql(title: &str, sql: &str) {
    let rule = "─".repeat(60);
    println!("\n{} {}", LOCK, style(title).bold().yellow());
    println!("{}", style(&rule).dim());
    println!("{}", sql);
    println!("{}", style(&rule).dim());
}

/// A titled block of command lines and notes, used for help output.
pub struct GuideSection {
    title: String,
    commands: Vec<(String, String)>,
    notes: Vec<String>,
}

impl GuideSection {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            commands: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn command(mut self, usage: &str, about: &str) -> Self {
        self.commands.push((usage.to_string(), about.to_string()));
        self
    }

    pub fn note(mut self, text: &str) -> Self {
        self.notes.push(text.to_string());
        self
    }

    pub fn print(&self) {
        println!("\n{}", style(&self.title).bold().underlined());
        let width = self
            .commands
            .iter()
            .map(|(usage, _)| usage.chars().count())
            .max()
            .unwrap_or(0);
        for (usage, about) in &self.commands {
            println!("  {:<width$}  {}", style(usage).cyan(), about, width = width);
        }
        for note in &self.notes {
            println!("  {}", style(note).dim());
        }
    }
}

pub fn print_banner() {
    println!(
        "\n{} {} {}\n",
        SPARKLE,
        style("trigger-updater").bold().cyan(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
}
