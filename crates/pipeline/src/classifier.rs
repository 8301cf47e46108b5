use std::sync::Arc;
use log::debug;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::job::{ItemState, MediaItem, MediaKind};
use crate::naming;
use crate::probe::MediaInfo;
use crate::rules::{RuleEntry, RuleTable};
use crate::scan::{Inbox, StagedKind};

/// Fallback show folder when neither the rule nor the filename yields a name
pub(crate) const UNSORTED_SHOW: &str = "Unsorted";

/// Decides TV vs movie vs unclassifiable for staged items
pub struct Classifier {
    config: Arc<PipelineConfig>,
    rules: Arc<RuleTable>,
}

impl Classifier {
    pub fn new(config: Arc<PipelineConfig>, rules: Arc<RuleTable>) -> Self {
        Self { config, rules }
    }

    /// Move a `Discovered` item into its terminal classification state.
    ///
    /// TV rules are tried first, in rule file order, against the inbox-relative
    /// path. Items that match no rule become movies only when staged in a
    /// movie inbox. `info` is only consulted for the movie resolution.
    pub fn classify(&self, item: &mut MediaItem, info: Option<&MediaInfo>) -> Result<(), PipelineError> {
        match item.state {
            ItemState::Discovered => {}
            ItemState::MatchedTv | ItemState::MatchedMovie => return Ok(()),
            ItemState::Unclassifiable => {
                return Err(failure(item, "item was already found unclassifiable".to_string()));
            }
        }

        if item.staged_kind == StagedKind::Other {
            return Err(self.unclassifiable(item, "unsupported file type".to_string()));
        }

        if let Some(rule) = self.rules.first_match(&item.relative) {
            self.match_tv(item, rule);
            return Ok(());
        }

        let subdir = match &item.inbox {
            Inbox::Movie(subdir) => subdir.clone(),
            Inbox::Root => {
                return Err(self.unclassifiable(
                    item,
                    "no TV rule matches and the file is not in a movie inbox".to_string(),
                ));
            }
        };

        let resolution = naming::resolution_from_name(item.file_name())
            .or_else(|| info.and_then(|i| i.height).map(naming::resolution_from_height));
        let resolution = match resolution {
            Some(r) => r.to_string(),
            None => {
                return Err(self.unclassifiable(item, "movie resolution could not be determined".to_string()));
            }
        };

        let crf = match self.config.encode.movie_crf_defaults.get(&resolution) {
            Some(crf) => *crf,
            None => {
                let reason = format!("no movie CRF configured for resolution {}", resolution);
                item.resolution = Some(resolution);
                return Err(self.unclassifiable(item, reason));
            }
        };

        item.state = ItemState::MatchedMovie;
        item.kind = MediaKind::Movie;
        item.adult_only = subdir.adult_only;
        item.resolution = Some(resolution);
        item.crf = Some(crf);
        item.preset = self.config.encode.preset_default;
        debug!(
            "Classified {} as movie (inbox: {}, adult_only: {}, resolution: {}, crf: {})",
            item.relative,
            subdir.name,
            item.adult_only,
            item.resolution.as_deref().unwrap_or_default(),
            crf
        );
        Ok(())
    }

    fn match_tv(&self, item: &mut MediaItem, rule: &RuleEntry) {
        let file_name = item.file_name().to_string();
        let episode = naming::extract_episode(&file_name, rule.episode_pattern.as_ref());

        let show = match &rule.show {
            Some(show) => show.clone(),
            None => match naming::show_title_from_filename(&file_name) {
                title if title.is_empty() => UNSORTED_SHOW.to_string(),
                title => title,
            },
        };

        item.state = ItemState::MatchedTv;
        item.kind = MediaKind::Tv;
        item.adult_only = rule.adult_only;
        item.season = rule.season.or(episode.and_then(|e| e.season));
        item.episode = episode.map(|e| naming::corrected_episode(e.episode, rule.offset));
        item.crf = Some(rule.crf_override.unwrap_or(self.config.encode.tv_crf_fallback));
        item.preset = self.config.encode.preset_default;
        item.move_only = rule.move_only;
        item.show = Some(show);
        item.rule = Some(rule.clone());

        debug!(
            "Classified {} as tv via rule row {} (show: {}, season: {:?}, episode: {:?}, adult_only: {}, crf: {:?})",
            item.relative,
            rule.row,
            item.show.as_deref().unwrap_or_default(),
            item.season,
            item.episode,
            item.adult_only,
            item.crf
        );
    }

    fn unclassifiable(&self, item: &mut MediaItem, reason: String) -> PipelineError {
        item.state = ItemState::Unclassifiable;
        item.kind = MediaKind::Unknown;
        debug!("Unclassifiable: {} ({})", item.relative, reason);
        failure(item, reason)
    }
}

fn failure(item: &MediaItem, reason: String) -> PipelineError {
    PipelineError::ClassificationFailure { path: item.source.clone(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::config_under;
    use crate::config::MovieSubdir;
    use crate::rules::tests::table_from;
    use crate::scan::StagedFile;
    use proptest::prelude::*;
    use std::path::Path;
    use std::sync::{Mutex, OnceLock};

    /// Process-wide logger that keeps every record, for asserting log levels
    struct RecordingLogger(Mutex<Vec<(log::Level, String)>>);

    impl log::Log for RecordingLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            let mut records = self.0.lock().unwrap_or_else(|p| p.into_inner());
            records.push((record.level(), record.args().to_string()));
        }

        fn flush(&self) {}
    }

    fn recording_logger() -> &'static RecordingLogger {
        static LOGGER: OnceLock<&'static RecordingLogger> = OnceLock::new();
        LOGGER.get_or_init(|| {
            let logger: &'static RecordingLogger = Box::leak(Box::new(RecordingLogger(Mutex::new(Vec::new()))));
            log::set_logger(logger).unwrap();
            log::set_max_level(log::LevelFilter::Trace);
            logger
        })
    }

    /// Levels of the records mentioning `needle`
    fn levels_mentioning(logger: &RecordingLogger, needle: &str) -> Vec<log::Level> {
        let records = logger.0.lock().unwrap();
        records.iter().filter(|(_, msg)| msg.contains(needle)).map(|(level, _)| *level).collect()
    }

    fn classifier(base: &Path, csv: &str) -> Classifier {
        Classifier::new(Arc::new(config_under(base)), Arc::new(table_from(csv)))
    }

    fn root_item(base: &Path, relative: &str) -> MediaItem {
        MediaItem::discovered(StagedFile {
            path: base.join("inbox").join(relative),
            relative: relative.to_string(),
            inbox: Inbox::Root,
            kind: StagedKind::Media,
        })
    }

    fn movie_item(base: &Path, subdir: &str, adult_only: bool, name: &str) -> MediaItem {
        MediaItem::discovered(StagedFile {
            path: base.join("inbox").join(subdir).join(name),
            relative: format!("{}/{}", subdir, name),
            inbox: Inbox::Movie(MovieSubdir { name: subdir.to_string(), adult_only }),
            kind: StagedKind::Media,
        })
    }

    fn info_with_height(height: u32) -> MediaInfo {
        MediaInfo { height: Some(height), ..MediaInfo::default() }
    }

    #[test]
    fn test_show_a_episode_routes_to_tv() {
        let base = Path::new("/srv");
        let c = classifier(base, "Show,FileSearchTerm,AdultOnly\nShow A,Show A,0\n");
        let mut item = root_item(base, "Show A/S01E02.mkv");

        c.classify(&mut item, None).unwrap();
        assert_eq!(item.state, ItemState::MatchedTv);
        assert_eq!(item.kind, MediaKind::Tv);
        assert!(!item.adult_only);
        assert_eq!(item.season, Some(1));
        assert_eq!(item.episode, Some(2));
        assert_eq!(item.crf, Some(32));
        assert_eq!(item.show.as_deref(), Some("Show A"));
        assert_eq!(item.preset, 6);
    }

    #[test]
    fn test_tv_crf_override_and_offset() {
        let base = Path::new("/srv");
        let c = classifier(
            base,
            "Show,FileSearchTerm,Season,Offset,AdultOnly,CRF\nUma,uma musume,2,12,1,27\n",
        );
        let mut item = root_item(base, "[Erai-raws] Uma Musume - 15 [1080p].mkv");

        c.classify(&mut item, None).unwrap();
        assert!(item.adult_only);
        assert_eq!(item.crf, Some(27));
        assert_eq!(item.season, Some(2));
        assert_eq!(item.episode, Some(3));
    }

    #[test]
    fn test_show_name_from_filename_when_rule_has_none() {
        let base = Path::new("/srv");
        let c = classifier(base, "FileSearchTerm\nfrieren\n");
        let mut item = root_item(base, "[SubsPlease] Frieren - 12 (1080p).mkv");

        c.classify(&mut item, None).unwrap();
        assert_eq!(item.show.as_deref(), Some("Frieren"));
        assert_eq!(item.season, None);
        assert_eq!(item.episode, Some(12));
    }

    #[test]
    fn test_adult_movie_1080p_gets_crf_30() {
        let base = Path::new("/srv");
        let c = classifier(base, "FileSearchTerm\nnothing-matches\n");
        let mut item = movie_item(base, "Adult", true, "Some.Film.2020.1080p.mkv");

        c.classify(&mut item, None).unwrap();
        assert_eq!(item.state, ItemState::MatchedMovie);
        assert_eq!(item.kind, MediaKind::Movie);
        assert!(item.adult_only);
        assert_eq!(item.resolution.as_deref(), Some("1080p"));
        assert_eq!(item.crf, Some(30));
    }

    #[test]
    fn test_movie_resolution_from_probe() {
        let base = Path::new("/srv");
        let c = classifier(base, "FileSearchTerm\nnothing-matches\n");
        let mut item = movie_item(base, "Movies", false, "Some.Film.2020.mkv");

        c.classify(&mut item, Some(&info_with_height(2160))).unwrap();
        assert_eq!(item.resolution.as_deref(), Some("2160p"));
        assert_eq!(item.crf, Some(28));
        assert!(!item.adult_only);
    }

    #[test]
    fn test_unmapped_resolution_is_classification_failure() {
        let base = Path::new("/srv");
        let c = classifier(base, "FileSearchTerm\nnothing-matches\n");
        let mut item = movie_item(base, "Movies", false, "Old.Film.1960.720p.mkv");

        let err = c.classify(&mut item, None).unwrap_err();
        assert!(matches!(err, PipelineError::ClassificationFailure { .. }));
        assert!(err.to_string().contains("720p"));
        assert_eq!(item.state, ItemState::Unclassifiable);
    }

    #[test]
    fn test_unknown_resolution_is_classification_failure() {
        let base = Path::new("/srv");
        let c = classifier(base, "FileSearchTerm\nnothing-matches\n");
        let mut item = movie_item(base, "Movies", false, "Mystery.mkv");

        let err = c.classify(&mut item, Some(&MediaInfo::default())).unwrap_err();
        assert!(err.to_string().contains("could not be determined"));
        assert_eq!(item.state, ItemState::Unclassifiable);
    }

    #[test]
    fn test_unmatched_root_file_is_unclassifiable() {
        let base = Path::new("/srv");
        let c = classifier(base, "FileSearchTerm\nshow a\n");
        let mut item = root_item(base, "Random.Thing.2019.1080p.mkv");

        let err = c.classify(&mut item, None).unwrap_err();
        assert!(matches!(err, PipelineError::ClassificationFailure { .. }));
        assert_eq!(item.state, ItemState::Unclassifiable);
        assert_eq!(item.kind, MediaKind::Unknown);
    }

    #[test]
    fn test_tv_rule_wins_inside_movie_inbox() {
        let base = Path::new("/srv");
        let c = classifier(base, "Show,FileSearchTerm\nDoc,documentary\n");
        let mut item = movie_item(base, "Movies", true, "Documentary.S01E01.1080p.mkv");

        c.classify(&mut item, None).unwrap();
        assert_eq!(item.kind, MediaKind::Tv);
        assert!(!item.adult_only);
    }

    #[test]
    fn test_unsupported_file_in_movie_inbox() {
        let base = Path::new("/srv");
        let c = classifier(base, "FileSearchTerm\nx\n");
        let mut item = MediaItem::discovered(StagedFile {
            path: base.join("inbox/Movies/readme.txt"),
            relative: "Movies/readme.txt".to_string(),
            inbox: Inbox::Movie(MovieSubdir { name: "Movies".to_string(), adult_only: false }),
            kind: StagedKind::Other,
        });
        assert!(c.classify(&mut item, None).is_err());
        assert_eq!(item.state, ItemState::Unclassifiable);
    }

    #[test]
    fn test_classification_decisions_log_at_debug() {
        let logger = recording_logger();
        let base = Path::new("/srv");
        let c = classifier(base, "Show,FileSearchTerm\nLogged Show,logged show\n");

        let mut tv = root_item(base, "Logged Show - 01.mkv");
        c.classify(&mut tv, None).unwrap();
        let mut movie = movie_item(base, "Movies", false, "Logged.Film.2020.1080p.mkv");
        c.classify(&mut movie, None).unwrap();
        let mut unknown = root_item(base, "Logged.Nothing.mkv");
        assert!(c.classify(&mut unknown, None).is_err());

        for needle in ["Logged Show - 01.mkv", "Logged.Film.2020.1080p.mkv", "Logged.Nothing.mkv"] {
            assert_eq!(levels_mentioning(logger, needle), vec![log::Level::Debug], "{}", needle);
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let base = Path::new("/srv");
        let c = classifier(
            base,
            "Show,FileSearchTerm,AdultOnly,CRF\nBroad,show,1,20\nNarrow,show a,0,40\n",
        );
        let mut item = root_item(base, "Show A/S01E02.mkv");
        c.classify(&mut item, None).unwrap();
        assert_eq!(item.show.as_deref(), Some("Broad"));
        assert_eq!(item.crf, Some(20));
        assert!(item.adult_only);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Same path and rule order always give the same kind, CRF and adult flag
        #[test]
        fn test_classification_is_deterministic(
            name in "[A-Za-z ]{1,12}( - [0-9]{1,2})?\\.mkv",
            adult in any::<bool>(),
            crf in proptest::option::of(0u32..=63),
        ) {
            let base = Path::new("/srv");
            let csv = format!(
                "Show,FileSearchTerm,AdultOnly,CRF\nA,a,{},{}\nE,e,0,\n",
                if adult { 1 } else { 0 },
                crf.map(|c| c.to_string()).unwrap_or_default()
            );
            let c = classifier(base, &csv);

            let mut first = root_item(base, &name);
            let mut second = root_item(base, &name);
            let r1 = c.classify(&mut first, None).is_ok();
            let r2 = c.classify(&mut second, None).is_ok();

            prop_assert_eq!(r1, r2);
            prop_assert_eq!(first.kind, second.kind);
            prop_assert_eq!(first.crf, second.crf);
            prop_assert_eq!(first.adult_only, second.adult_only);
        }

        /// Rule override beats the TV fallback; no override means the fallback
        #[test]
        fn test_tv_crf_precedence(crf in proptest::option::of(0u32..=63)) {
            let base = Path::new("/srv");
            let csv = format!(
                "FileSearchTerm,CRF\nshow,{}\n",
                crf.map(|c| c.to_string()).unwrap_or_default()
            );
            let c = classifier(base, &csv);
            let mut item = root_item(base, "Show - 01.mkv");
            c.classify(&mut item, None).unwrap();
            prop_assert_eq!(item.crf, Some(crf.unwrap_or(32)));
        }

        /// Movie CRF comes only from an exact resolution key
        #[test]
        fn test_movie_crf_exact_key_only(height in 0u32..4000) {
            let base = Path::new("/srv");
            let c = classifier(base, "FileSearchTerm\nnothing-matches\n");
            let mut item = movie_item(base, "Movies", false, "Film.2001.mkv");
            let result = c.classify(&mut item, Some(&info_with_height(height)));

            match naming::resolution_from_height(height) {
                "1080p" => prop_assert_eq!(item.crf, Some(30)),
                "2160p" => prop_assert_eq!(item.crf, Some(28)),
                _ => {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(item.crf, None);
                }
            }
        }
    }
}
