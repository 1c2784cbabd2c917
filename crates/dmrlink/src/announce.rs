//! Voice announcements: prompt loading, speech assembly and the paced
//! worker pool.
//!
//! Workers only sleep and forward finished frames to the core over a
//! bounded channel. Slot state and sends stay on the core task.

use crate::endpoint::SystemId;
use crate::stream::LcSet;
use dmr_common::frame::{Dmrd, FrameBits, PAYLOAD_LEN};
use dmr_common::lc::{Lc, LcCodec, HEADER_TEMPLATE, TERMINATOR_TEMPLATE};
use dmr_common::types::{CallType, DmrId, FrameType, Slot, StreamId, DT_VOICE_TERM};
use rand::Rng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Concurrent announcement jobs.
pub const MAX_JOBS: usize = 4;
/// Gap between synthetic frames.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(58);
/// Delay before the first frame, so the caller's radio is back on receive.
pub const LEAD_IN: Duration = Duration::from_secs(1);

/// Id announcements are sent from.
pub const ANNOUNCE_SOURCE: DmrId = 5000;

const PROMPT_EXT: &str = "ambe";
const ONDEMAND_DIR: &str = "ondemand";

/// One recorded voice burst.
pub type Burst = [u8; PAYLOAD_LEN];

/// Something to say on one system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    /// Where to send it.
    pub system: SystemId,
    /// Timeslot.
    pub slot: Slot,
    /// Destination talkgroup.
    pub dst: DmrId,
    /// Source radio id.
    pub rf_src: DmrId,
    /// Repeater id field.
    pub peer: DmrId,
    /// Prompt language.
    pub language: String,
    /// Words in order; `ondemand/<n>` selects an on-demand file.
    pub words: Vec<String>,
}

impl SpeechRequest {
    /// A prompt from the announcement id to talkgroup 9 on slot 2.
    #[must_use]
    pub fn prompt(system: SystemId, language: &str, words: Vec<String>) -> Self {
        Self {
            system,
            slot: Slot::Two,
            dst: dmr_common::types::REFLECTOR_TG,
            rf_src: ANNOUNCE_SOURCE,
            peer: dmr_common::types::REFLECTOR_TG,
            language: language.to_string(),
            words,
        }
    }
}

/// Builds a word list, one entry per word.
pub fn words<'a>(list: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    list.into_iter().map(str::to_string).collect()
}

/// Appends the digits of `n` with silence between them.
pub fn push_digits(words: &mut Vec<String>, n: DmrId) {
    for c in n.to_string().chars() {
        words.push(c.to_string());
        words.push("silence".to_string());
    }
}

/// Recorded prompt bursts by language and word.
#[derive(Debug, Default, Clone)]
pub struct Prompts {
    languages: Vec<String>,
    words: HashMap<String, HashMap<String, Vec<Burst>>>,
}

impl Prompts {
    /// Reads `<root>/<lang>/*.ambe` and `<root>/<lang>/ondemand/*.ambe` for
    /// every language. Unreadable directories leave that language empty.
    pub fn load(root: &Path, languages: &[&str]) -> Self {
        let mut prompts = Self {
            languages: languages.iter().map(|l| (*l).to_string()).collect(),
            words: HashMap::new(),
        };
        for lang in languages {
            let mut table = HashMap::new();
            let dir = root.join(lang);
            read_dir_into(&dir, "", &mut table);
            read_dir_into(&dir.join(ONDEMAND_DIR), "ondemand/", &mut table);
            info!("(ANNOUNCE) loaded {} prompts for {}", table.len(), lang);
            prompts.words.insert((*lang).to_string(), table);
        }
        prompts
    }

    /// Adds one word by hand.
    pub fn insert(&mut self, lang: &str, word: &str, bursts: Vec<Burst>) {
        if !self.languages.iter().any(|l| l == lang) {
            self.languages.push(lang.to_string());
        }
        self.words
            .entry(lang.to_string())
            .or_default()
            .insert(word.to_string(), bursts);
    }

    /// `lang` if it was loaded, else the first configured language.
    #[must_use]
    pub fn language<'a>(&'a self, lang: &'a str) -> &'a str {
        if self.words.contains_key(lang) {
            lang
        } else {
            self.languages.first().map_or(lang, String::as_str)
        }
    }

    /// Bursts of one word.
    #[must_use]
    pub fn word(&self, lang: &str, word: &str) -> Option<&[Burst]> {
        self.words.get(self.language(lang))?.get(word).map(Vec::as_slice)
    }
}

fn read_dir_into(dir: &Path, prefix: &str, table: &mut HashMap<String, Vec<Burst>>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            debug!("(ANNOUNCE) cannot read {}: {}", dir.display(), e);
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(PROMPT_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match std::fs::read(&path) {
            Ok(bytes) => {
                table.insert(format!("{prefix}{stem}"), bursts(&bytes));
            }
            Err(e) => warn!("(ANNOUNCE) cannot read {}: {}", path.display(), e),
        }
    }
}

/// Splits a prompt file into bursts; a trailing partial burst is dropped.
#[must_use]
pub fn bursts(bytes: &[u8]) -> Vec<Burst> {
    bytes
        .chunks_exact(PAYLOAD_LEN)
        .filter_map(|c| c.try_into().ok())
        .collect()
}

/// Assembles one synthetic group call: header, the voice bursts of every
/// word with embedded LC in B-E, terminator.
#[must_use]
pub fn build_speech(codec: &dyn LcCodec, prompts: &Prompts, req: &SpeechRequest, stream_id: StreamId) -> Vec<Dmrd> {
    let lcs = LcSet::new(codec, Lc::group(req.dst, req.rf_src));
    let mut frames = Vec::new();
    let mut seq: u8 = 0;
    let mut push = |bits: FrameBits, payload: Burst, frames: &mut Vec<Dmrd>| {
        let mut dmrd = Dmrd {
            seq,
            rf_src: req.rf_src,
            dst: req.dst,
            peer: req.peer,
            bits,
            stream_id,
            payload,
            ber: 0,
            rssi: 0,
        };
        lcs.rewrite(&mut dmrd);
        frames.push(dmrd);
        seq = seq.wrapping_add(1);
    };

    push(FrameBits::voice_header(req.slot), HEADER_TEMPLATE, &mut frames);
    let mut burst = 0u8;
    for word in &req.words {
        let Some(bursts) = prompts.word(&req.language, word) else {
            warn!("(ANNOUNCE) no prompt for word {} in {}", word, req.language);
            continue;
        };
        for payload in bursts {
            let vseq = burst % 6;
            let bits = FrameBits {
                slot: req.slot,
                call_type: CallType::Group,
                frame_type: if vseq == 0 { FrameType::VoiceSync } else { FrameType::Voice },
                dtype_vseq: vseq,
            };
            push(bits, *payload, &mut frames);
            burst = burst.wrapping_add(1);
        }
    }
    let term = FrameBits {
        slot: req.slot,
        call_type: CallType::Group,
        frame_type: FrameType::DataSync,
        dtype_vseq: DT_VOICE_TERM,
    };
    push(term, TERMINATOR_TEMPLATE, &mut frames);
    frames
}

/// A paced frame on its way back to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechFrame {
    /// Target system.
    pub system: SystemId,
    /// The burst.
    pub dmrd: Dmrd,
}

/// Spawns announcement jobs on a bounded pool.
#[derive(Clone)]
pub struct Announcer<C> {
    prompts: Arc<Prompts>,
    codec: C,
    jobs: Arc<Semaphore>,
    frames: mpsc::Sender<SpeechFrame>,
}

impl<C: LcCodec + Clone + Send + Sync + 'static> Announcer<C> {
    /// A pool delivering frames into `frames`.
    pub fn new(prompts: Prompts, codec: C, frames: mpsc::Sender<SpeechFrame>) -> Self {
        Self {
            prompts: Arc::new(prompts),
            codec,
            jobs: Arc::new(Semaphore::new(MAX_JOBS)),
            frames,
        }
    }

    /// Loaded prompts.
    #[must_use]
    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    /// Queues one announcement. Jobs beyond the pool size wait for a slot.
    pub fn spawn(&self, req: SpeechRequest) {
        let prompts = Arc::clone(&self.prompts);
        let codec = self.codec.clone();
        let jobs = Arc::clone(&self.jobs);
        let tx = self.frames.clone();
        tokio::spawn(async move {
            let Ok(_permit) = jobs.acquire_owned().await else {
                return;
            };
            let stream_id: StreamId = rand::thread_rng().gen_range(1..=u32::MAX);
            let frames = build_speech(&codec, &prompts, &req, stream_id);
            debug!(
                "(ANNOUNCE) speaking {} words to system {} on TS{}, {} frames",
                req.words.len(),
                req.system,
                req.slot.number(),
                frames.len()
            );
            tokio::time::sleep(LEAD_IN).await;
            for dmrd in frames {
                tokio::time::sleep(FRAME_INTERVAL).await;
                if tx
                    .send(SpeechFrame {
                        system: req.system,
                        dmrd,
                    })
                    .await
                    .is_err()
                {
                    debug!("(ANNOUNCE) core gone, announcement abandoned");
                    return;
                }
            }
            debug!("(ANNOUNCE) announcement to system {} ended", req.system);
        });
    }
}

impl<C> std::fmt::Debug for Announcer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Announcer")
            .field("available", &self.jobs.available_permits())
            .finish_non_exhaustive()
    }
}
