//! Line-based playback controls read from stdin.

use routeview_core::Control;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::warn;

pub const HELP: &str = "commands: play | pause | seek <meters> | seek <percent>% | cancel | resume | link <from> <to> | quit";

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_control(line: &str) -> Result<Option<Control>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let control = match (verb.to_lowercase().as_str(), args.as_slice()) {
        ("play", []) => Control::Play,
        ("pause", []) => Control::Pause,
        ("cancel", []) => Control::Cancel,
        ("resume", []) => Control::Resume,
        ("q" | "quit" | "exit", []) => Control::Shutdown,
        ("seek", [target]) => match target.strip_suffix('%') {
            Some(percent) => Control::SeekFraction(parse_number(percent)? / 100.0),
            None => Control::Seek(parse_number(target)?),
        },
        ("link", [from, to]) => Control::LinkPanos(from.to_string(), to.to_string()),
        _ => return Err(format!("unrecognized command {:?}; {}", line.trim(), HELP)),
    };
    Ok(Some(control))
}

fn parse_number(text: &str) -> Result<f64, String> {
    text.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| format!("not a number: {:?}", text))
}

/// Forwards parsed commands until input ends, `quit` is read, or the
/// session stops listening.
pub async fn forward_controls<R>(input: R, controls: mpsc::Sender<Control>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_control(&line) {
            Ok(Some(control)) => {
                let quit = control == Control::Shutdown;
                if controls.send(control).await.is_err() || quit {
                    return;
                }
            }
            Ok(None) => {}
            Err(message) => warn!("{}", message),
        }
    }
}
