use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context as _;
use clap::{ArgAction, Parser};
use kalah_arena::logger::Logger;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name    = "runner",
    version,
    about   = "Kalah Arena — player runner",
    long_about = "Bridges a player program to the arena server. Once a match\n\
                  starts, every stdout line of the program is forwarded as a\n\
                  DAT payload and every inbound DAT payload is written to the\n\
                  program's stdin. With --register, creates an account instead."
)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:31337")]
    server: String,

    /// Player program to launch once a match starts
    #[arg(short, long)]
    program: Option<String>,

    /// Authenticate before queueing
    #[arg(short, long, num_args = 2, value_names = ["USER", "PASSWORD"])]
    user: Option<Vec<String>>,

    /// Register an account, then exit
    #[arg(short, long, num_args = 2, value_names = ["USER", "PASSWORD"])]
    register: Option<Vec<String>>,

    /// Which game to queue for
    #[arg(short, long, default_value = "KLH")]
    game: String,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

// ── RUNNER EVENTS (operational logging to stderr) ─────────────────────────────

enum RunnerEvent<'a> {
    Connecting { addr: &'a str },
    Sending    { line: &'a str },
    Received   { line: &'a str },
    Launched   { program: &'a str },
    Refused    { text: &'a str },
    Finished   { line: &'a str },
    ServerClosed,
    ProgramExited,
}

impl fmt::Display for RunnerEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerEvent::Connecting { addr }    => write!(f, "Connecting to {addr}…"),
            RunnerEvent::Sending    { line }    => write!(f, "→ {line}"),
            RunnerEvent::Received   { line }    => write!(f, "← {line}"),
            RunnerEvent::Launched   { program } => write!(f, "Match started, launching {program}"),
            RunnerEvent::Refused    { text }    => write!(f, "Server refused: {text}"),
            RunnerEvent::Finished   { line }    => write!(f, "Game over: {line}"),
            RunnerEvent::ServerClosed           => write!(f, "Server closed the connection"),
            RunnerEvent::ProgramExited          => write!(f, "Player program closed its stdout"),
        }
    }
}

// ── WIRING ────────────────────────────────────────────────────────────────────

async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    log: &Logger,
    line: &str,
) -> anyhow::Result<()> {
    log.verbose(RunnerEvent::Sending { line });
    writer
        .write_all(format!("{line}\n").as_bytes())
        .await
        .context("sending to server")
}

/// Next stdout line of the player program; pends forever while there is no
/// program yet (the select arm is also guarded, this keeps it honest).
async fn program_line(
    lines: &mut Option<Lines<BufReader<ChildStdout>>>,
) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

struct Player {
    child: Child,
    stdin: ChildStdin,
}

fn launch(program: &str) -> anyhow::Result<(Player, Lines<BufReader<ChildStdout>>)> {
    let mut parts = program.split_whitespace();
    let bin = parts.next().context("empty --program")?;
    let mut child = Command::new(bin)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("launching {program}"))?;
    let stdin = child.stdin.take().context("program has no stdin")?;
    let stdout = child.stdout.take().context("program has no stdout")?;
    let lines = BufReader::new(stdout).lines();
    Ok((Player { child, stdin }, lines))
}

// ── ENTRY POINT ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log = Logger::new(args.verbose);

    log.info(RunnerEvent::Connecting { addr: &args.server });
    let stream = TcpStream::connect(&args.server)
        .await
        .with_context(|| format!("connecting to {}", args.server))?;
    let (reader, mut writer) = tokio::io::split(stream);
    let mut server_lines = BufReader::new(reader).lines();

    if let Some(pair) = &args.register {
        send(&mut writer, &log, &format!("REG {} {}", pair[0], pair[1])).await?;
        // Success is silent; give a refusal a moment to arrive.
        match tokio::time::timeout(Duration::from_millis(500), server_lines.next_line()).await {
            Ok(Ok(Some(line))) => anyhow::bail!("registration failed: {line}"),
            _ => println!("Registered {}", pair[0]),
        }
        return Ok(());
    }

    let user = args.user.as_ref().context("--user is required to play")?;
    let program = args.program.as_ref().context("--program is required to play")?;

    send(&mut writer, &log, &format!("ATH {} {}", user[0], user[1])).await?;
    send(&mut writer, &log, &format!("LFG {}", args.game)).await?;

    let mut player: Option<Player> = None;
    let mut player_out: Option<Lines<BufReader<ChildStdout>>> = None;

    loop {
        tokio::select! {
            // ── Server → program ──────────────────────────────────────────────
            result = server_lines.next_line() => {
                let Ok(Some(line)) = result else {
                    log.info(RunnerEvent::ServerClosed);
                    break;
                };
                let line = line.trim();
                log.trace(RunnerEvent::Received { line });

                let mut tok = line.split_whitespace();
                match tok.next() {
                    Some("SRT") => {
                        log.info(RunnerEvent::Launched { program });
                        let (spawned, lines) = launch(program)?;
                        player = Some(spawned);
                        player_out = Some(lines);
                    }
                    Some("DAT") => {
                        // Forward the full trailing payload verbatim.
                        let payload = line.splitn(3, ' ').nth(2).unwrap_or_default();
                        if let Some(player) = player.as_mut() {
                            player
                                .stdin
                                .write_all(format!("{payload}\n").as_bytes())
                                .await
                                .context("writing to the player program")?;
                        }
                    }
                    Some("FIN") => {
                        log.info(RunnerEvent::Finished { line });
                        break;
                    }
                    Some("ERR") => {
                        log.warn(RunnerEvent::Refused { text: line });
                        if player.is_none() {
                            // Refused before any match began; nothing to wait for.
                            anyhow::bail!("{line}");
                        }
                    }
                    // Board renders and the scoreboard are for human eyes.
                    _ => log.verbose(RunnerEvent::Received { line }),
                }
            }

            // ── Program → server ──────────────────────────────────────────────
            result = program_line(&mut player_out), if player_out.is_some() => {
                let Ok(Some(line)) = result else {
                    log.info(RunnerEvent::ProgramExited);
                    break;
                };
                send(&mut writer, &log, &format!("DAT {} {}", args.game, line.trim())).await?;
            }
        }
    }

    if let Some(mut player) = player.take() {
        let _ = player.child.start_kill();
    }
    Ok(())
}
