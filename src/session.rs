//! Interactive command loop. Every failure inside a command is reported and
//! the loop continues. A quit signal or a lost terminal ends the session, and
//! either way the list is saved first.

use std::io::Write;

use tracing::{info, warn};

use crate::app::App;
use crate::catalog::CatalogClient;
use crate::domain::Entry;
use crate::error::MalqError;
use crate::progress::ProgressSink;
use crate::prompt::{Answer, Command, HELP, Prompt};
use crate::search::SearchService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

macro_rules! answer {
    ($prompt:expr) => {
        match $prompt? {
            Answer::Value(value) => value,
            Answer::Cancelled => return Ok(Flow::Continue),
            Answer::Quit => return Ok(Flow::Quit),
        }
    };
}

pub fn run_session<C, S, W>(
    app: &mut App<C, S>,
    prompt: &mut Prompt<W>,
    sink: &dyn ProgressSink,
) -> Result<(), MalqError>
where
    C: CatalogClient,
    S: SearchService,
    W: Write,
{
    let ended = command_loop(app, prompt, sink);
    let saved = app.shutdown();
    if let Err(err) = &ended {
        warn!(error = %err, "terminal lost, session ended early");
    }
    ended?;
    saved?;
    prompt.say(format!("\nCached {} shows.", app.store().len()))?;
    info!("session ended");
    Ok(())
}

/// Runs commands until quit. Only terminal failures escape.
fn command_loop<C, S, W>(
    app: &mut App<C, S>,
    prompt: &mut Prompt<W>,
    sink: &dyn ProgressSink,
) -> Result<(), MalqError>
where
    C: CatalogClient,
    S: SearchService,
    W: Write,
{
    loop {
        let token = match prompt.line(">>> ")? {
            Answer::Value(token) => token,
            Answer::Cancelled => continue,
            Answer::Quit => return Ok(()),
        };
        if token.is_empty() {
            continue;
        }
        let command = match token.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                prompt.say(err)?;
                continue;
            }
        };

        match dispatch(command, app, prompt, sink) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return Ok(()),
            Err(err @ MalqError::Terminal(_)) => return Err(err),
            Err(err) => {
                warn!(error = %err, ?command, "command failed");
                prompt.say(err)?;
            }
        }
    }
}

fn dispatch<C, S, W>(
    command: Command,
    app: &mut App<C, S>,
    prompt: &mut Prompt<W>,
    sink: &dyn ProgressSink,
) -> Result<Flow, MalqError>
where
    C: CatalogClient,
    S: SearchService,
    W: Write,
{
    match command {
        Command::SearchCatalog => {
            let query = answer!(prompt.line("Search MAL; enter your search query: "));
            let results = app.search_catalog(&query)?;
            print_indexed(prompt, results.iter())?;
        }
        Command::AddToList => {
            let query = answer!(prompt.line("Add to list; enter your search query: "));
            let mut results = app.search_catalog(&query)?;
            if results.is_empty() {
                prompt.say("No results.")?;
                return Ok(Flow::Continue);
            }
            print_indexed(prompt, results.iter())?;
            let index = answer!(prompt.index("What index do you want to add? ", results.len()));
            let entry = results.swap_remove(index);
            let name = entry.name.clone();
            match app.add(entry) {
                Ok(()) => prompt.say(format!("Added '{name}' to list."))?,
                Err(MalqError::DuplicateEntry { name, .. }) => {
                    prompt.say(format!("'{name}' already in list, cancelling."))?
                }
                Err(err) => return Err(err),
            }
        }
        Command::RemoveFromList => {
            let len = app.store().len();
            if len == 0 {
                prompt.say("Your list is empty.")?;
                return Ok(Flow::Continue);
            }
            print_indexed(prompt, app.store().entries().iter())?;
            let index = answer!(prompt.index("What index do you want to remove? ", len));
            let removed = app.remove_at(index)?;
            prompt.say(format!("Removed '{}' from list.", removed.name))?;
        }
        Command::SearchList => {
            let query = answer!(prompt.line("Search list; enter your search query: "));
            for entry in app.search_list(&query) {
                prompt.say(format!("  {entry}"))?;
            }
        }
        Command::CheckList => {
            let list = app.check_list();
            if list.entries.is_empty() {
                prompt.say("Your list is empty.")?;
            }
            for entry in &list.entries {
                prompt.say(format!("  {entry}"))?;
            }
        }
        Command::RefreshAll => {
            let report = app.refresh(true, sink)?;
            prompt.say(format!("Refreshed {} shows.", report.fetched))?;
        }
        Command::Details => {
            let len = app.store().len();
            if len == 0 {
                prompt.say("Your list is empty.")?;
                return Ok(Flow::Continue);
            }
            print_indexed(prompt, app.store().entries().iter())?;
            let index = answer!(prompt.index("What index do you want details for? ", len));
            let id = app.store().entries()[index].id;
            let entry = app.details(id)?;
            print_details(prompt, &entry)?;
        }
        Command::SearchTransfers => {
            if !app.has_search() {
                return Err(MalqError::SearchUnavailable);
            }
            let finished: Vec<Entry> = app.completed().into_iter().cloned().collect();
            if finished.is_empty() {
                prompt.say("No finished shows in your list.")?;
                return Ok(Flow::Continue);
            }
            print_indexed(prompt, finished.iter())?;
            let index = answer!(prompt.index(
                "What index do you want to search for on qBittorrent? ",
                finished.len()
            ));
            let extra = answer!(
                prompt.line("Additional search query (eg `judas`, `batch`, etc): ")
            );
            let results = app.search_transfers(&finished[index], &extra, sink)?;
            if results.is_empty() {
                prompt.say("No torrents found.")?;
                return Ok(Flow::Continue);
            }
            print_indexed(prompt, results.iter())?;
            let index = answer!(prompt.index(
                "What index do you want to download with qBittorrent? ",
                results.len()
            ));
            app.submit_transfer(&results[index])?;
            prompt.say("Torrent added successfully.")?;
        }
        Command::Help => prompt.say(HELP)?,
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn print_indexed<W, I, T>(prompt: &mut Prompt<W>, items: I) -> Result<(), MalqError>
where
    W: Write,
    I: Iterator<Item = T>,
    T: std::fmt::Display,
{
    for (index, item) in items.enumerate() {
        prompt.say(format!("  [{index}] : {item}"))?;
    }
    Ok(())
}

fn print_details<W: Write>(prompt: &mut Prompt<W>, entry: &Entry) -> Result<(), MalqError> {
    prompt.say(format!("  {entry}"))?;
    if let Some(period) = &entry.start_period {
        prompt.say(format!("  started: {period}"))?;
    }
    if !entry.tags.is_empty() {
        prompt.say(format!("  tags: {}", entry.tags.join(", ")))?;
    }
    if entry.related_entries.is_empty() {
        prompt.say("  no related shows")?;
    }
    for related in &entry.related_entries {
        prompt.say(format!("    {related}"))?;
    }
    Ok(())
}
