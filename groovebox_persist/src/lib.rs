//! Sparse save/load of a [`Song`] as a JSON document: `version`, `name`,
//! `tempo`, and a sparse `events` array holding only the switch-on cells.
//! This is the host-side persistence collaborator; the dense in-memory
//! `Song` never itself touches a filesystem or a string.

use groovebox_core::song::{Song, MODE_COUNT, PATTERN_COUNT, STEP_COUNT, TRACK_COUNT};
use serde::{Deserialize, Serialize};

pub const DOCUMENT_VERSION: &str = "1.0";

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EventRecord {
    mode: u8,
    pattern: u8,
    track: u8,
    step: u8,
    switch: bool,
    pots: [u8; 4],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SongDocument {
    version: String,
    name: String,
    tempo: u16,
    #[serde(default)]
    events: Vec<EventRecord>,
}

/// Errors that can occur while loading a document. Any of these leaves
/// the in-memory song untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistError {
    UnsupportedVersion(String),
    MalformedDocument(String),
}

/// What a successful `load` found: the document's declared name/tempo, plus
/// a count of entries that failed an index-range check and were skipped
/// rather than treated as a hard failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadOutcome {
    pub name: String,
    pub tempo: u16,
    pub skipped: u32,
}

/// Serialize every switch-on event in `song` (sparse — switch-off cells
/// carry no information and are omitted) into a UTF-8 text document.
pub fn save(song: &Song, name: &str, tempo: u16) -> String {
    let mut events = Vec::new();
    for mode in 0..MODE_COUNT as u8 {
        for pattern in 0..PATTERN_COUNT as u8 {
            for track in 0..TRACK_COUNT as u8 {
                for step in 0..STEP_COUNT as u8 {
                    let event = song
                        .event(mode, pattern, track, step)
                        .expect("indices are within the model's own bounds");
                    if event.switch() {
                        events.push(EventRecord {
                            mode,
                            pattern,
                            track,
                            step,
                            switch: true,
                            pots: event.pots(),
                        });
                    }
                }
            }
        }
    }
    let document = SongDocument {
        version: DOCUMENT_VERSION.to_string(),
        name: name.to_string(),
        tempo,
        events,
    };
    serde_json::to_string_pretty(&document).expect("SongDocument is always representable as JSON")
}

/// Parse `text` and replace every event in `song` with the document's
/// contents, in place (no reallocation). Entries whose indices fall
/// outside the model's bounds are skipped and counted rather than failing
/// the whole load. A missing `events` array loads as an empty song.
pub fn load(text: &str, song: &mut Song) -> Result<LoadOutcome, PersistError> {
    let document: SongDocument =
        serde_json::from_str(text).map_err(|e| PersistError::MalformedDocument(e.to_string()))?;

    if document.version != DOCUMENT_VERSION {
        return Err(PersistError::UnsupportedVersion(document.version));
    }

    song.clear();
    let mut skipped = 0u32;
    for record in &document.events {
        match song.event_mut(record.mode, record.pattern, record.track, record.step) {
            Ok(event) => {
                event.set_switch(record.switch);
                for (i, &pot) in record.pots.iter().enumerate() {
                    event.set_pot(i, pot);
                }
            }
            Err(_) => {
                log::warn!(
                    "[persist] skipped out-of-range event mode={} pattern={} track={} step={}",
                    record.mode,
                    record.pattern,
                    record.track,
                    record.step
                );
                skipped += 1;
            }
        }
    }

    Ok(LoadOutcome {
        name: document.name,
        tempo: document.tempo,
        skipped,
    })
}
