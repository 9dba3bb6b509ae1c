//! Interactive operator console.
//!
//! A line-oriented menu over [`KeyAdmin`]: generate, list, ban, extend and
//! delete keys. Input and output are generic so the console can be driven by
//! a script in tests.

use keylock_license::{
    AdminError, Expiry, ExtendMode, ExtendOutcome, GENERATED_KEYS_FILE, KeyAdmin, KeyDuration,
    KeyId, KeyRow, record_generated,
};
use keylock_store::DocumentStore;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Main menu entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Generate,
    List,
    Ban,
    Extend,
    Delete,
    Exit,
}

impl MenuItem {
    #[must_use]
    pub fn parse(choice: &str) -> Option<Self> {
        match choice.trim() {
            "1" => Some(Self::Generate),
            "2" => Some(Self::List),
            "3" => Some(Self::Ban),
            "4" => Some(Self::Extend),
            "5" => Some(Self::Delete),
            "6" => Some(Self::Exit),
            _ => None,
        }
    }
}

const MENU: &str = "\
=== License keys ===
1. Generate keys
2. List keys
3. Ban key
4. Extend key
5. Delete keys
6. Exit";

/// The interactive console.
pub struct Console<S, R, W> {
    admin: KeyAdmin<S>,
    input: R,
    output: W,
    keys_file: PathBuf,
}

impl<S: DocumentStore, R: BufRead, W: Write> Console<S, R, W> {
    pub fn new(admin: KeyAdmin<S>, input: R, output: W) -> Self {
        Self {
            admin,
            input,
            output,
            keys_file: PathBuf::from(GENERATED_KEYS_FILE),
        }
    }

    /// Sets the ledger file newly generated keys are appended to.
    #[must_use]
    pub fn with_keys_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys_file = path.into();
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs the menu until `Exit` or end of input.
    ///
    /// # Errors
    ///
    /// Returns an error only if reading input or writing output fails.
    /// Store failures are reported on the console.
    pub async fn run(&mut self) -> io::Result<()> {
        loop {
            writeln!(self.output, "\n{MENU}")?;
            let Some(choice) = self.prompt("Choice: ")? else {
                break;
            };

            match MenuItem::parse(&choice) {
                Some(MenuItem::Generate) => self.generate().await?,
                Some(MenuItem::List) => self.list().await?,
                Some(MenuItem::Ban) => self.ban().await?,
                Some(MenuItem::Extend) => self.extend().await?,
                Some(MenuItem::Delete) => self.delete().await?,
                Some(MenuItem::Exit) => break,
                None => writeln!(self.output, "Unknown choice: {}", choice.trim())?,
            }
        }

        writeln!(self.output, "Bye.")?;
        Ok(())
    }

    /// Prints `label` and reads one trimmed line. `None` at end of input.
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{label}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Reads a key; `None` on empty input or a malformed key.
    fn prompt_key(&mut self, label: &str) -> io::Result<Option<KeyId>> {
        let Some(input) = self.prompt(label)?.filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        match KeyId::parse(&input) {
            Ok(key) => Ok(Some(key)),
            Err(e) => {
                writeln!(self.output, "{e}")?;
                Ok(None)
            }
        }
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.prompt(&format!("{question} (y/n): "))?;
        Ok(answer.is_some_and(|a| a.eq_ignore_ascii_case("y")))
    }

    async fn generate(&mut self) -> io::Result<()> {
        writeln!(self.output, "Duration:")?;
        for (i, duration) in KeyDuration::ALL.iter().enumerate() {
            writeln!(self.output, "{}. {}", i + 1, duration)?;
        }
        let choice = self.prompt("Choice: ")?.unwrap_or_default();
        let duration = KeyDuration::from_menu_choice(&choice);

        let count = self
            .prompt("How many keys: ")?
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);

        let report = self.admin.generate(count, duration).await;

        writeln!(
            self.output,
            "Created {} key(s) ({duration}):",
            report.created.len()
        )?;
        for key in &report.created {
            writeln!(self.output, "  {key}")?;
        }
        for (key, err) in &report.failed {
            writeln!(self.output, "  {key} failed: {err}")?;
        }

        if !report.created.is_empty() {
            match record_generated(&self.keys_file, &report.created) {
                Ok(()) => {
                    debug!("Recorded keys in {:?}", self.keys_file);
                    writeln!(self.output, "Saved to {}", self.keys_file.display())?;
                }
                Err(e) => {
                    warn!("Failed to record keys in {:?}: {}", self.keys_file, e);
                    writeln!(
                        self.output,
                        "Could not save keys to {}: {e}",
                        self.keys_file.display()
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn list(&mut self) -> io::Result<()> {
        let rows = match self.admin.list().await {
            Ok(rows) => rows,
            Err(e) => return writeln!(self.output, "Failed to list keys: {e}"),
        };

        if rows.is_empty() {
            return writeln!(self.output, "No keys.");
        }

        writeln!(self.output, "{}", render_header())?;
        for row in &rows {
            writeln!(self.output, "{}", render_row(row))?;
        }
        writeln!(self.output, "{} key(s)", rows.len())
    }

    async fn ban(&mut self) -> io::Result<()> {
        let Some(key) = self.prompt_key("Key to ban: ")? else {
            return Ok(());
        };

        match self.admin.ban(&key).await {
            Ok(()) => writeln!(self.output, "Key {key} banned."),
            Err(e) => writeln!(self.output, "Failed to ban {key}: {e}"),
        }
    }

    async fn extend(&mut self) -> io::Result<()> {
        let Some(key) = self.prompt_key("Key to extend: ")? else {
            return Ok(());
        };

        writeln!(self.output, "1. Add days\n2. Set lifetime")?;
        let mode = match self.prompt("Choice: ")?.as_deref() {
            Some("1") => {
                let days = self
                    .prompt("Days to add: ")?
                    .and_then(|s| s.parse::<u32>().ok())
                    .filter(|d| *d > 0);
                match days {
                    Some(days) => ExtendMode::AddDays(days),
                    None => return writeln!(self.output, "Invalid number of days."),
                }
            }
            Some("2") => ExtendMode::Lifetime,
            _ => return writeln!(self.output, "Cancelled."),
        };

        let result = match self.admin.extend(&key, mode, false).await {
            Err(AdminError::LifetimeDowngradeNeedsConfirmation(_)) => {
                let ExtendMode::AddDays(days) = mode else {
                    return Ok(());
                };
                let question = format!(
                    "Key {key} never expires. Replace with an expiry {days} day(s) from now?"
                );
                if !self.confirm(&question)? {
                    return writeln!(self.output, "Cancelled.");
                }
                self.admin.extend(&key, mode, true).await
            }
            other => other,
        };

        match result {
            Ok(ExtendOutcome::ExpiryUpdated(Expiry::Lifetime)) => {
                writeln!(self.output, "Key {key} no longer expires.")
            }
            Ok(ExtendOutcome::ExpiryUpdated(expiry)) => {
                writeln!(self.output, "Key {key} now expires on {}.", expiry.short_display())
            }
            Ok(ExtendOutcome::DurationIncreased(days)) => writeln!(
                self.output,
                "Key {key} is not activated yet; it will run for {days} days from activation."
            ),
            Err(e) => writeln!(self.output, "Failed to extend {key}: {e}"),
        }
    }

    async fn delete(&mut self) -> io::Result<()> {
        let Some(input) = self.prompt("Keys to delete (space separated): ")? else {
            return Ok(());
        };

        let mut keys = Vec::new();
        for word in input.split_whitespace() {
            match KeyId::parse(word) {
                Ok(key) => keys.push(key),
                Err(e) => writeln!(self.output, "Skipping {word}: {e}")?,
            }
        }
        if keys.is_empty() {
            return Ok(());
        }

        if !self.confirm(&format!("Delete {} key(s)?", keys.len()))? {
            return writeln!(self.output, "Cancelled.");
        }

        for (key, result) in self.admin.delete(&keys).await {
            match result {
                Ok(()) => writeln!(self.output, "Deleted {key}")?,
                Err(e) => writeln!(self.output, "Failed to delete {key}: {e}")?,
            }
        }
        Ok(())
    }
}

fn render_header() -> String {
    format!(
        "{:<19}  {:<6}  {:<26}  {:<36}  {}",
        "KEY", "STATUS", "TERM", "HWID", "LOGIN"
    )
}

/// Formats one listing row.
#[must_use]
pub fn render_row(row: &KeyRow) -> String {
    format!(
        "{:<19}  {:<6}  {:<26}  {:<36}  {}",
        row.key,
        row.status.to_string(),
        row.term,
        row.hwid,
        row.login
    )
}
