//! Filename heuristics: episode numbers, output names and library folder names.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::{NoExpand, Regex};

/// `S01E02` style tag, yields season and episode
static SEASON_EPISODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S(\d{1,2})E(\d{1,3})").expect("valid regex"));

/// Fallback episode patterns, tried in order; group 1 is the episode number
static EPISODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "E03", "e3" not glued to a longer token
        r"(?i)(?:^|[^A-Za-z0-9])E(\d{1,3})(?:\D|$)",
        // "1x03"
        r"(?i)\d{1,2}x(\d{1,3})(?:\D|$)",
        // "Part 2 - 03 [1080p]", "Show - 12.mkv"
        r"[-–—]\s*(\d{1,3})\s*(?:\[|\(|\.|$)",
        // "Episode 03", "Ep 03", "Ep.03", "Ep-03"
        r"(?i)\b(?:Episode|Ep\.?)[\s.\-:]*?(\d{1,3})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

static DASH_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" - \d{1,3}").expect("valid regex"));

static MOVIE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})(?:\D|$)").expect("valid regex"));

static QUALITY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:1080p|2160p|720p|480p|WEB[- ]?DL|WEBRip|BluRay|BRRip|REPACK)\b")
        .expect("valid regex")
});

static CODEC_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:hevc|x265|x264|h\.265|h\.264|avc)\b").expect("valid regex")
});

/// Resolution labels recognised in filenames, highest first
const RESOLUTION_TAGS: &[&str] = &["2160p", "1080p", "720p", "480p"];

/// Resolution tags rewritten in output names
static OUTPUT_RESOLUTION_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    ["2160p", "1080p", "720p"]
        .into_iter()
        .map(|tag| (tag, Regex::new(&format!(r"(?i)\b{}\b", tag)).expect("valid regex")))
        .collect()
});

const SMALL_WORDS: &[&str] = &[
    "a", "an", "and", "as", "at", "but", "by", "for", "from", "in", "into", "nor", "of", "on",
    "or", "over", "per", "the", "to", "via", "with",
];

/// Episode position extracted from a filename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeRef {
    /// Season from an `SxxEyy` tag, when the name carries one
    pub season: Option<u32>,
    pub episode: u32,
}

/// Pull season/episode out of a filename.
///
/// An `SxxEyy` tag wins; otherwise the rule's own pattern (if any) is tried,
/// then the built-in patterns.
pub fn extract_episode(name: &str, rule_pattern: Option<&Regex>) -> Option<EpisodeRef> {
    if let Some(caps) = SEASON_EPISODE_RE.captures(name) {
        let season = caps[1].parse().ok()?;
        let episode = caps[2].parse().ok()?;
        return Some(EpisodeRef { season: Some(season), episode });
    }

    let first_number = |re: &Regex| {
        re.captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    };

    if let Some(episode) = rule_pattern.and_then(first_number) {
        return Some(EpisodeRef { season: None, episode });
    }
    EPISODE_PATTERNS
        .iter()
        .find_map(first_number)
        .map(|episode| EpisodeRef { season: None, episode })
}

/// Subtract a positive episode offset; other offsets, and results below 1,
/// leave the raw number
pub fn corrected_episode(episode: u32, offset: i32) -> u32 {
    if offset <= 0 {
        return episode;
    }
    match episode.checked_sub(offset as u32) {
        Some(corrected) if corrected >= 1 => corrected,
        _ => episode,
    }
}

/// Rewrite ` - 03` into ` - S01E03` unless the name is already tagged
pub fn tag_episode_in_name(base_name: &str, season: u32, episode: u32) -> String {
    if SEASON_EPISODE_RE.is_match(base_name) {
        return base_name.to_string();
    }
    let tag = format!(" - S{:02}E{:02}", season, episode);
    DASH_NUMBER_RE.replacen(base_name, 1, NoExpand(&tag)).into_owned()
}

/// First resolution tag present in a filename
pub fn resolution_from_name(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    RESOLUTION_TAGS.iter().copied().find(|tag| lower.contains(tag))
}

/// Resolution label for a probed frame height
pub fn resolution_from_height(height: u32) -> &'static str {
    if height >= 2160 {
        "2160p"
    } else if height >= 1080 {
        "1080p"
    } else if height >= 720 {
        "720p"
    } else {
        "480p"
    }
}

/// Output stem with resolution tags expanded to `1080p_AV1_10Bit_C30` and codec tags replaced by `AV1`
pub fn build_output_stem(stem: &str, crf: u32, bit_depth: u8) -> String {
    let mut name = stem.to_string();
    for (tag, re) in OUTPUT_RESOLUTION_RES.iter() {
        let replacement = format!("{}_AV1_{}Bit_C{}", tag, bit_depth, crf);
        name = re.replace_all(&name, NoExpand(&replacement)).into_owned();
    }
    CODEC_TAG_RE.replace_all(&name, "AV1").into_owned()
}

/// Strip characters that are invalid in folder names on common filesystems
pub fn sanitize_folder_name(name: &str) -> String {
    const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
    let cleaned: String = name.chars().filter(|c| !RESERVED.contains(c)).collect();
    cleaned.trim().trim_end_matches([' ', '.']).to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

fn clean_title_segment(segment: &str) -> String {
    let spaced = segment.replace(['.', '_'], " ");
    let spaced = spaced.trim_end_matches([' ', '(', '[', '-']);
    let words: Vec<&str> = spaced.split_whitespace().collect();
    let last = words.len().saturating_sub(1);

    words
        .iter()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i != 0 && i != last && SMALL_WORDS.contains(&lower.as_str()) {
                lower
            } else if word.chars().count() > 1 && word.chars().all(|c| !c.is_lowercase()) {
                word.to_string()
            } else {
                capitalize(word)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title and release year parsed from a movie filename
pub fn parse_movie_title_year(path: &Path) -> (String, Option<u32>) {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    match MOVIE_YEAR_RE.captures(stem).and_then(|c| c.get(1)) {
        Some(year_match) => {
            let year = year_match.as_str().parse().ok();
            let mut title = clean_title_segment(&stem[..year_match.start()]);
            if title.is_empty() {
                title = clean_title_segment(&stem[..year_match.end()]);
            }
            (title, year)
        }
        None => {
            let clip = match QUALITY_TAG_RE.find(stem) {
                Some(m) => &stem[..m.start()],
                None => stem,
            };
            (clean_title_segment(clip), None)
        }
    }
}

/// `Title (Year)` folder name for a movie file
pub fn movie_folder_name(path: &Path) -> String {
    match parse_movie_title_year(path) {
        (title, Some(year)) => format!("{} ({})", title, year),
        (title, None) => title,
    }
}

/// Library folder for a movie: `<base>/<Title (Year)>`
pub fn movie_dest_dir(base: &Path, source: &Path) -> PathBuf {
    base.join(sanitize_folder_name(&movie_folder_name(source)))
}

/// Library folder for an episode: `<base>/<Show>[/Season NN]`
pub fn tv_dest_dir(base: &Path, show: &str, season: Option<u32>) -> PathBuf {
    let show_dir = base.join(sanitize_folder_name(show));
    match season {
        Some(season) if season > 0 => show_dir.join(format!("Season {:02}", season)),
        _ => show_dir,
    }
}

/// Best-effort show title from a release filename, used when a rule names no show
pub fn show_title_from_filename(file_name: &str) -> String {
    static LEADING_GROUP_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\[[^\]]+\]\s*").expect("valid regex"));
    static EXTENSION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\.[a-zA-Z0-9]{2,4}$").expect("valid regex"));
    static BRACKETED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("valid regex"));
    static EPISODE_SUFFIX_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+-\s+\d{1,4}(?:v\d+)?\b").expect("valid regex"));
    static SEASON_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\bS(?:eason)?\s*\d{1,2}(?:E\d{1,3})?\b").expect("valid regex"));
    static RELEASE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(?:480p|720p|1080p|2160p|4k|x264|x265|hevc|avc|h\.?264|h\.?265|webrip|web[- ]?dl|bluray|brrip|repack)\b")
            .expect("valid regex")
    });
    static TRAILING_NUMBER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b\d{1,4}\s*$").expect("valid regex"));
    static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    let name = LEADING_GROUP_RE.replace(file_name, "");
    let name = EXTENSION_RE.replace(&name, "");
    let name = BRACKETED_RE.replace_all(&name, "");
    let name = name.replace(['_', '.'], " ");
    let name = EPISODE_SUFFIX_RE.split(&name).next().unwrap_or_default().to_string();
    let name = SEASON_RE.replace_all(&name, "");
    let name = RELEASE_TAG_RE.replace_all(&name, "");
    let name = TRAILING_NUMBER_RE.replace(name.trim_end(), "");
    let name = SPACES_RE.replace_all(&name, " ");
    name.trim_matches([' ', '.', '-', '_']).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_season_episode_tag_wins() {
        let ep = extract_episode("Show A S01E02 1080p.mkv", None).unwrap();
        assert_eq!(ep, EpisodeRef { season: Some(1), episode: 2 });
    }

    #[test]
    fn test_builtin_episode_patterns() {
        let cases = [
            ("[Group] Show - 03 [1080p].mkv", 3),
            ("Show E07.mkv", 7),
            ("Show 2x05.mkv", 5),
            ("Show Episode 11.mkv", 11),
            ("Show Ep.4 720p.mkv", 4),
        ];
        for (name, expected) in cases {
            let ep = extract_episode(name, None).unwrap_or_else(|| panic!("no episode in {}", name));
            assert_eq!(ep.episode, expected, "{}", name);
            assert_eq!(ep.season, None);
        }
        assert!(extract_episode("Just A Title.mkv", None).is_none());
    }

    #[test]
    fn test_rule_pattern_before_builtins() {
        let custom = Regex::new(r"#(\d+)").unwrap();
        let ep = extract_episode("Show #12 - 03.mkv", Some(&custom)).unwrap();
        assert_eq!(ep.episode, 12);
    }

    #[test]
    fn test_offset_correction() {
        assert_eq!(corrected_episode(15, 12), 3);
        assert_eq!(corrected_episode(3, 12), 3);
        assert_eq!(corrected_episode(3, -2), 3);
        assert_eq!(corrected_episode(12, 12), 12);
        assert_eq!(corrected_episode(3, 0), 3);
    }

    #[test]
    fn test_tag_episode_in_name() {
        assert_eq!(
            tag_episode_in_name("[Erai-raws] Uma Musume Part 2 - 03 [1080p]", 2, 3),
            "[Erai-raws] Uma Musume Part 2 - S02E03 [1080p]"
        );
        assert_eq!(tag_episode_in_name("Show S01E03", 2, 3), "Show S01E03");
        assert_eq!(tag_episode_in_name("Show Episode", 1, 1), "Show Episode");
    }

    #[test]
    fn test_output_stem_substitutions() {
        assert_eq!(
            build_output_stem("Show - 03 [1080p HEVC]", 30, 10),
            "Show - 03 [1080p_AV1_10Bit_C30 AV1]"
        );
        assert_eq!(build_output_stem("Movie.2160p.x265", 28, 8), "Movie.2160p_AV1_8Bit_C28.AV1");
        assert_eq!(build_output_stem("Plain Name", 30, 8), "Plain Name");
    }

    #[test]
    fn test_resolution_detection() {
        assert_eq!(resolution_from_name("Movie.2010.1080P.mkv"), Some("1080p"));
        assert_eq!(resolution_from_name("Movie.mkv"), None);
        assert_eq!(resolution_from_height(2160), "2160p");
        assert_eq!(resolution_from_height(1080), "1080p");
        assert_eq!(resolution_from_height(800), "720p");
        assert_eq!(resolution_from_height(576), "480p");
    }

    #[test]
    fn test_movie_title_and_year() {
        assert_eq!(
            parse_movie_title_year(Path::new("the.lord.of.the.rings.2001.1080p.mkv")),
            ("The Lord of the Rings".to_string(), Some(2001))
        );
        assert_eq!(
            parse_movie_title_year(Path::new("Some_Film (1999) [BluRay].mkv")),
            ("Some Film".to_string(), Some(1999))
        );
        assert_eq!(
            parse_movie_title_year(Path::new("no.year.here.WEBRip.mkv")),
            ("No Year Here".to_string(), None)
        );
        assert_eq!(movie_folder_name(Path::new("FBI.Story.1959.mkv")), "FBI Story (1959)");
    }

    #[test]
    fn test_dest_dirs() {
        let base = Path::new("/lib/tv");
        assert_eq!(tv_dest_dir(base, "Show: A?", Some(1)), PathBuf::from("/lib/tv/Show A/Season 01"));
        assert_eq!(tv_dest_dir(base, "Show A", None), PathBuf::from("/lib/tv/Show A"));
        assert_eq!(
            movie_dest_dir(Path::new("/lib/movies"), Path::new("heat.1995.mkv")),
            PathBuf::from("/lib/movies/Heat (1995)")
        );
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("  What? <Now>. "), "What Now");
        assert_eq!(sanitize_folder_name("A/B\\C"), "ABC");
    }

    #[test]
    fn test_show_title_from_filename() {
        assert_eq!(
            show_title_from_filename("[SubsPlease] Frieren - 12 (1080p) [ABCD1234].mkv"),
            "Frieren"
        );
        assert_eq!(show_title_from_filename("Some.Show.S02E05.720p.WEBRip.x264.mkv"), "Some Show");
    }
}
