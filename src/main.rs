//! Interactive shell over the engine.
//!
//! Not a server: the wire protocol and event loop live elsewhere. This
//! binary wires a single local client straight into the command
//! dispatcher, which is enough to exercise the engine by hand.

use std::io::{self, BufRead, Write};

use coral::core::clock::mstime;
use coral::{Config, Engine};

/// Split a line into argument bytes, honoring double quotes.
fn split_args(line: &str) -> Vec<Vec<u8>> {
    let mut args = Vec::new();
    let mut current = Vec::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.extend(c.to_string().into_bytes()),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

fn main() {
    env_logger::init();
    log::info!("coral {} interactive shell", coral::VERSION);

    let mut engine = Engine::new(Config::default());
    let client = engine.create_client(0);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("coral> ");
        stdout.flush().ok();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        engine.tick(mstime());
        let argv = split_args(line);
        for reply in engine.execute(client, &argv) {
            println!("{reply}");
        }
    }
}
