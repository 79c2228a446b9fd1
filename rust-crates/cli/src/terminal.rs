use lottery_client::{
    Error,
    Notifier,
    Result,
    workflow::UserMessage,
};
use serde::Serialize;
use tokio::io::{
    AsyncBufReadExt,
    AsyncWriteExt,
    BufReader,
};

/// Prints action failures to stderr in place of a message dialog.
#[derive(Clone, Copy, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, message: UserMessage) {
        eprintln!("{}: {}", message.title, message.body);
    }
}

/// Asks a yes/no question on the terminal. Anything but `y`/`yes` is
/// `Error::Cancelled`.
pub async fn confirm(question: String, assume_yes: bool) -> Result<()> {
    if assume_yes {
        return Ok(());
    }
    let mut stdout = tokio::io::stdout();
    let mut answer = String::new();
    stdout
        .write_all(format!("{question} [y/N] ").as_bytes())
        .await
        .and(stdout.flush().await)
        .map_err(|e| Error::connectivity(format!("terminal: {e}")))?;
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await
        .map_err(|e| Error::connectivity(format!("terminal: {e}")))?;
    if is_yes(&answer) {
        Ok(())
    } else {
        Err(Error::Cancelled)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn print_json(value: &impl Serialize) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn format_numbers(numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    #[test]
    fn is_yes__accepts_only_affirmative_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
        assert!(!is_yes("yep"));
    }

    #[tokio::test]
    async fn confirm__assume_yes__skips_prompt() {
        assert!(confirm("Close the round?".to_string(), true).await.is_ok());
    }

    #[test]
    fn format_numbers__space_separated() {
        assert_eq!(format_numbers(&[1, 22, 90]), "1 22 90");
        assert_eq!(format_numbers(&[]), "");
    }
}
