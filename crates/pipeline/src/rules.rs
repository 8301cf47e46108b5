use std::io::Read;
use std::path::Path;
use log::{debug, info};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use crate::error::RuleLoadError;

/// How a rule recognises a show in an inbox path
#[derive(Debug, Clone)]
pub enum ShowMatcher {
    /// Case-insensitive substring; stored lowercased
    Substring(String),
    /// Case-insensitive regular expression
    Pattern(Regex),
}

impl ShowMatcher {
    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            ShowMatcher::Substring(term) => candidate.to_lowercase().contains(term.as_str()),
            ShowMatcher::Pattern(re) => re.is_match(candidate),
        }
    }
}

/// One validated row of the TV rule file
#[derive(Debug, Clone)]
pub struct RuleEntry {
    /// 1-based data row in the rule file, for log lines
    pub row: usize,
    /// Library show folder; `None` means derive it from the filename
    pub show: Option<String>,
    pub matcher: ShowMatcher,
    /// Season for library placement and episode tagging
    pub season: Option<u32>,
    /// Subtracted from extracted episode numbers
    pub offset: i32,
    /// Rule-specific episode pattern, group 1 is the episode number
    pub episode_pattern: Option<Regex>,
    pub adult_only: bool,
    pub crf_override: Option<u32>,
    /// Relocate without encoding
    pub move_only: bool,
}

/// Raw CSV row; every column is text so validation can name the offending value
#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "Show", default)]
    show: String,
    #[serde(rename = "FileSearchTerm", default)]
    file_search_term: String,
    #[serde(rename = "RegexSearch", default)]
    regex_search: String,
    #[serde(rename = "Season", default)]
    season: String,
    #[serde(rename = "Offset", default)]
    offset: String,
    #[serde(rename = "EpisodePattern", default)]
    episode_pattern: String,
    #[serde(rename = "AdultOnly", default)]
    adult_only: String,
    #[serde(rename = "CRF", default)]
    crf: String,
    #[serde(rename = "MoveOnly", default)]
    move_only: String,
}

/// Ordered, immutable TV rule set; order is match priority
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RuleEntry>,
}

impl RuleTable {
    pub fn new(rules: Vec<RuleEntry>) -> Self {
        Self { rules }
    }

    /// Load and validate the rule file; any malformed row rejects the whole file
    pub fn load(path: &Path) -> Result<Self, RuleLoadError> {
        let file = std::fs::File::open(path).map_err(|e| RuleLoadError::Read {
            path: path.to_path_buf(),
            source: csv::Error::from(e),
        })?;
        let table = Self::from_reader(file, path)?;
        info!("Loaded {} TV rule(s) from {}", table.len(), path.display());
        Ok(table)
    }

    /// Parse rules from any CSV source; `origin` is only used in error messages
    pub fn from_reader<R: Read>(reader: R, origin: &Path) -> Result<Self, RuleLoadError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rules = Vec::new();
        for (index, record) in csv_reader.deserialize::<RawRule>().enumerate() {
            let row = index + 1;
            let raw = record.map_err(|source| RuleLoadError::Read {
                path: origin.to_path_buf(),
                source,
            })?;
            match parse_row(row, raw)? {
                Some(rule) => rules.push(rule),
                None => debug!("Rule row {} has no FileSearchTerm, skipping", row),
            }
        }
        Ok(Self { rules })
    }

    /// First rule, in file order, whose matcher accepts the inbox-relative path
    pub fn first_match(&self, relative_path: &str) -> Option<&RuleEntry> {
        self.rules.iter().find(|rule| rule.matcher.is_match(relative_path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleEntry> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn parse_row(row: usize, raw: RawRule) -> Result<Option<RuleEntry>, RuleLoadError> {
    let term = raw.file_search_term.trim();
    if term.is_empty() {
        return Ok(None);
    }

    let use_regex = parse_flag(row, "RegexSearch", &raw.regex_search)?;
    let matcher = if use_regex {
        let re = RegexBuilder::new(term)
            .case_insensitive(true)
            .build()
            .map_err(|source| RuleLoadError::InvalidRegex { row, column: "FileSearchTerm", source })?;
        ShowMatcher::Pattern(re)
    } else {
        ShowMatcher::Substring(term.to_lowercase())
    };

    let episode_pattern = match raw.episode_pattern.trim() {
        "" => None,
        pattern => Some(
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| RuleLoadError::InvalidRegex { row, column: "EpisodePattern", source })?,
        ),
    };

    let season = match parse_int(row, "Season", &raw.season)? {
        Some(s) if s < 0 || s > u32::MAX as i64 => {
            return Err(invalid(row, "Season", &raw.season));
        }
        Some(0) | None => None,
        Some(s) => Some(s as u32),
    };

    let offset = match parse_int(row, "Offset", &raw.offset)? {
        Some(o) => i32::try_from(o).map_err(|_| invalid(row, "Offset", &raw.offset))?,
        None => 0,
    };

    let crf_override = if raw.crf.trim().eq_ignore_ascii_case("vmaf") {
        None
    } else {
        match parse_int(row, "CRF", &raw.crf)? {
            Some(crf) if !(0..=63).contains(&crf) => {
                return Err(RuleLoadError::CrfOutOfRange { row, crf });
            }
            Some(crf) => Some(crf as u32),
            None => None,
        }
    };

    let show = match raw.show.trim() {
        "" => None,
        s => Some(s.to_string()),
    };

    Ok(Some(RuleEntry {
        row,
        show,
        matcher,
        season,
        offset,
        episode_pattern,
        adult_only: parse_flag(row, "AdultOnly", &raw.adult_only)?,
        crf_override,
        move_only: parse_flag(row, "MoveOnly", &raw.move_only)?,
    }))
}

fn invalid(row: usize, column: &'static str, value: &str) -> RuleLoadError {
    RuleLoadError::InvalidValue { row, column, value: value.to_string() }
}

/// Integer cell; spreadsheet exports sometimes write `2.0`
fn parse_int(row: usize, column: &'static str, value: &str) -> Result<Option<i64>, RuleLoadError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(n) = value.parse::<i64>() {
        return Ok(Some(n));
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(Some(f as i64)),
        _ => Err(invalid(row, column, value)),
    }
}

fn parse_flag(row: usize, column: &'static str, value: &str) -> Result<bool, RuleLoadError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "0.0" | "false" | "no" => Ok(false),
        "1" | "1.0" | "true" | "yes" => Ok(true),
        _ => Err(invalid(row, column, value)),
    }
}
