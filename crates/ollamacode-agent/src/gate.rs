use std::io::{self, BufRead, Write};
use std::sync::{Mutex, PoisonError};

/// Typed token for actions that cannot be undone.
pub const STRICT_TOKEN: &str = "CONFIRM";

const RULE_WIDTH: usize = 60;

/// Asks the user before side effects. `Ok(false)` is a decline; an `Err`
/// means the prompt itself could not be shown or answered.
pub trait ConfirmationGate: Send + Sync {
    fn confirm(&self, action: &str, details: &str) -> io::Result<bool>;
    fn confirm_with_preview(&self, action: &str, preview: &str) -> io::Result<bool>;
    fn confirm_dangerous_action(&self, action: &str, warning: &str) -> io::Result<bool>;
}

/// Where the gate reads answers from.
pub trait LineSource: Send {
    /// Same contract as [`BufRead::read_line`]: `Ok(0)` at end of input.
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize>;
}

impl LineSource for io::Stdin {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        io::Stdin::read_line(self, buf)
    }
}

impl<T: AsRef<[u8]> + Send> LineSource for io::Cursor<T> {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        BufRead::read_line(self, buf)
    }
}

/// Line-oriented prompt on a pair of streams. Prompts from concurrent callers
/// are serialized.
pub struct TerminalGate<R, W> {
    io: Mutex<(R, W)>,
}

pub type StdioGate = TerminalGate<io::Stdin, io::Stdout>;

impl StdioGate {
    pub fn stdio() -> Self {
        Self::new(io::stdin(), io::stdout())
    }
}

impl<R: LineSource, W: Write + Send> TerminalGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }

    fn ask(&self, prompt: &str) -> io::Result<Option<String>> {
        let mut guard = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let (input, output) = &mut *guard;
        write!(output, "{prompt}")?;
        output.flush()?;
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            writeln!(output)?;
            return Ok(None);
        }
        Ok(Some(answer.trim().to_string()))
    }

    fn ask_yes_no(&self, prompt: &str) -> io::Result<bool> {
        Ok(self.ask(prompt)?.is_some_and(|answer| is_affirmative(&answer)))
    }
}

impl<R: LineSource> TerminalGate<R, Vec<u8>> {
    /// Everything written to the output so far.
    pub fn transcript(&self) -> String {
        let guard = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&guard.1).into_owned()
    }
}

impl<R: LineSource, W: Write + Send> ConfirmationGate for TerminalGate<R, W> {
    fn confirm(&self, action: &str, details: &str) -> io::Result<bool> {
        let mut prompt = format!("\n⚠️  {action}\n");
        if !details.trim().is_empty() {
            prompt.push_str(&format!("   {}\n", details.trim()));
        }
        prompt.push_str("Proceed? [y/N]: ");
        self.ask_yes_no(&prompt)
    }

    fn confirm_with_preview(&self, action: &str, preview: &str) -> io::Result<bool> {
        let rule = "─".repeat(RULE_WIDTH);
        let prompt = format!(
            "\n⚠️  {action}\n{rule}\n{}\n{rule}\nApply this change? [y/N]: ",
            preview.trim_end()
        );
        self.ask_yes_no(&prompt)
    }

    fn confirm_dangerous_action(&self, action: &str, warning: &str) -> io::Result<bool> {
        let prompt = format!(
            "\n🚨 DANGEROUS: {action}\n   {}\nType {STRICT_TOKEN} to proceed: ",
            warning.trim()
        );
        Ok(self.ask(&prompt)?.is_some_and(|answer| answer == STRICT_TOKEN))
    }
}

/// Accepts English and Portuguese short and long forms, case-insensitive.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes" | "s" | "sim"
    )
}
