//! Raw filename validation and tile extraction
//!
//! Raw data files follow strict observatory naming conventions; anything
//! else entering the pipeline is a sign of a mislabeled feed and is
//! rejected before the job can be queued.

use std::sync::OnceLock;

use regex::Regex;

fn raw_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // Continuum camera raw: s8a20140321_00042_0001.sdf
            Regex::new(r"^s[48][a-d][0-9]{8}_[0-9]{5}_[0-9]{4}\.sdf$").unwrap(),
            // Heterodyne raw: a20140321_00042_01_0001.sdf
            Regex::new(r"^a[0-9]{8}_[0-9]{5}_[0-9]{2}_[0-9]{4}\.sdf$").unwrap(),
        ]
    })
}

fn tile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_healpix([0-9]{6})_").unwrap())
}

/// Whether a filename matches one of the accepted raw naming conventions.
pub fn is_valid_raw_name(filename: &str) -> bool {
    raw_patterns().iter().any(|p| p.is_match(filename))
}

/// Filenames from the list that fail the naming check.
pub fn invalid_names<'a>(filenames: &'a [String]) -> Vec<&'a str> {
    filenames
        .iter()
        .map(String::as_str)
        .filter(|name| !is_valid_raw_name(name))
        .collect()
}

/// Tile numbers encoded in sky-tiled output filenames, deduplicated and
/// sorted.
pub fn tiles_from_filenames(filenames: &[String]) -> Vec<i64> {
    let mut tiles: Vec<i64> = filenames
        .iter()
        .filter_map(|name| tile_pattern().captures(name))
        .filter_map(|caps| caps[1].parse::<i64>().ok())
        .collect();

    tiles.sort_unstable();
    tiles.dedup();
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_raw_names() {
        assert!(is_valid_raw_name("s8a20140321_00042_0001.sdf"));
        assert!(is_valid_raw_name("s4d20140321_00042_0012.sdf"));
        assert!(is_valid_raw_name("a20140321_00042_01_0001.sdf"));
    }

    #[test]
    fn test_invalid_raw_names() {
        assert!(!is_valid_raw_name("s9a20140321_00042_0001.sdf"));
        assert!(!is_valid_raw_name("s8a20140321_0042_0001.sdf"));
        assert!(!is_valid_raw_name("notes.txt"));
        assert!(!is_valid_raw_name("s8a20140321_00042_0001.sdf.part"));
    }

    #[test]
    fn test_invalid_names_reports_offenders() {
        let files = vec![
            "s8a20140321_00042_0001.sdf".to_string(),
            "junk.dat".to_string(),
        ];
        assert_eq!(invalid_names(&files), vec!["junk.dat"]);
    }

    #[test]
    fn test_tiles_from_filenames() {
        let files = vec![
            "jcmts_20140321_00042_850_healpix000042_obs_000.fits".to_string(),
            "jcmts_20140321_00043_850_healpix000042_obs_000.fits".to_string(),
            "jcmts_20140321_00044_850_healpix001999_obs_000.fits".to_string(),
            "no_tile_here.fits".to_string(),
        ];
        assert_eq!(tiles_from_filenames(&files), vec![42, 1999]);
    }
}
