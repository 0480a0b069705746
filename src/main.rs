use std::env;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::process;

use log::debug;

use zvm3::{
    new_handle, new_story_processor, Handle, LocationObserver, Result, ZErr, ZInput, ZOutput,
};

struct StdinInput;

impl ZInput for StdinInput {
    fn read_line(&mut self) -> Result<String> {
        // Prompt text is usually still buffered at this point.
        io::stdout().flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(ZErr::InputClosed);
        }
        Ok(line)
    }
}

struct StdoutOutput;

impl ZOutput for StdoutOutput {
    fn print(&mut self, text: &str) {
        print!("{}", text);
    }
}

// Logs every room-to-room move; an external mapper can feed on the same
// notifications.
struct JourneyLog;

impl LocationObserver for JourneyLog {
    fn location_changed(&mut self, old: u16, new: u16) {
        debug!("journey: moved from object {} to object {}", old, new);
    }
}

struct Args {
    story_path: String,
    seed: Option<u64>,
}

fn parse_args() -> std::result::Result<Args, String> {
    let mut story_path = None;
    let mut seed = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seed" => {
                let value = args.next().ok_or("--seed needs a value")?;
                seed = Some(value.parse::<u64>().map_err(|_| "--seed needs a number")?);
            }
            _ if story_path.is_none() => story_path = Some(arg),
            _ => return Err(format!("unexpected argument: {}", arg)),
        }
    }

    Ok(Args {
        story_path: story_path.ok_or("usage: zvm3 [--seed N] STORY-FILE")?,
        seed,
    })
}

fn run(args: &Args) -> Result<()> {
    let mut rdr = File::open(&args.story_path)?;
    let mut machine = new_story_processor(&mut rdr, StdinInput, StdoutOutput)?;

    let journey: Handle<dyn LocationObserver> = new_handle(JourneyLog);
    machine.set_observer(Some(journey));
    if let Some(seed) = args.seed {
        machine.seed_random(seed);
    }

    machine.run()
}

fn main() {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            process::exit(2);
        }
    };

    match run(&args) {
        Ok(()) => (),
        // End of stdin just ends the session.
        Err(ZErr::InputClosed) => println!(),
        Err(e) if e.is_image_fault() => {
            eprintln!("error: this story file appears to be corrupt: {}", e);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("error: interpreter fault: {}", e);
            process::exit(1);
        }
    }
}
