use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};

use aquakeeper_core::bot::Bot;
use aquakeeper_core::service::AquaService;

/// Talk to the bot from the terminal, with the same flows as in Telegram.
pub(crate) fn cmd_chat(svc: &AquaService, user_id: i64) -> Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_chat(svc, user_id, stdin.lock(), stdout.lock())
}

fn run_chat<R: BufRead, W: Write>(
    svc: &AquaService,
    user_id: i64,
    mut input: R,
    mut out: W,
) -> Result<()> {
    let bot = Bot::default();
    writeln!(
        out,
        "Chatting as user {user_id}. Send /help for commands, Ctrl-D to quit."
    )?;

    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        line.clear();
        if input.read_line(&mut line).context("Failed to read input")? == 0 {
            writeln!(out)?;
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        for reply in bot.handle(svc, user_id, &line) {
            writeln!(out, "{reply}")?;
        }
    }

    Ok(())
}
