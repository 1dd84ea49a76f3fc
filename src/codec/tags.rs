//! Tag-string helpers shared by the codecs and the estimator.

/// The non-chunk ("outside") tag.
pub const OUT_TAG: &str = "O";

/// Tag used as the synthetic context before the first token.
pub const START_TAG: &str = OUT_TAG;

/// Token used as the synthetic context before the first token.
pub const START_TOKEN: &str = ".";

/// Prefix marking the first token of a chunk.
pub const BEGIN_TAG_PREFIX: &str = "B_";

/// Prefix marking a non-initial token of a chunk.
pub const IN_TAG_PREFIX: &str = "I_";

const PREFIX_LEN: usize = 2;

pub fn is_out_tag(tag: &str) -> bool {
    tag == OUT_TAG
}

pub fn is_begin_tag(tag: &str) -> bool {
    tag.starts_with(BEGIN_TAG_PREFIX)
}

pub fn is_inner_tag(tag: &str) -> bool {
    tag.starts_with(IN_TAG_PREFIX)
}

/// Strip a begin/inner prefix, if present.
pub fn base_tag(tag: &str) -> &str {
    if is_begin_tag(tag) || is_inner_tag(tag) {
        &tag[PREFIX_LEN..]
    } else {
        tag
    }
}

pub fn equal_base_tags(tag1: &str, tag2: &str) -> bool {
    base_tag(tag1) == base_tag(tag2)
}

/// An inner tag may only follow a tag of the same base type.
pub fn illegal_sequence(tag1: &str, tag2: &str) -> bool {
    is_inner_tag(tag2) && !equal_base_tags(tag1, tag2)
}

pub fn to_begin_tag(tag: &str) -> String {
    if is_out_tag(tag) || is_begin_tag(tag) {
        tag.to_string()
    } else {
        format!("{BEGIN_TAG_PREFIX}{tag}")
    }
}

pub fn to_inner_tag(tag: &str) -> String {
    if is_out_tag(tag) {
        tag.to_string()
    } else {
        format!("{IN_TAG_PREFIX}{}", base_tag(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_tag() {
        assert_eq!(base_tag("B_PERSON"), "PERSON");
        assert_eq!(base_tag("I_PERSON"), "PERSON");
        assert_eq!(base_tag("O"), "O");
        assert_eq!(base_tag("PERSON"), "PERSON");
    }

    #[test]
    fn test_to_inner_tag() {
        assert_eq!(to_inner_tag("B_LOC"), "I_LOC");
        assert_eq!(to_inner_tag("I_LOC"), "I_LOC");
        assert_eq!(to_inner_tag("LOC"), "I_LOC");
        assert_eq!(to_inner_tag("O"), "O");
    }

    #[test]
    fn test_to_begin_tag() {
        assert_eq!(to_begin_tag("LOC"), "B_LOC");
        assert_eq!(to_begin_tag("B_LOC"), "B_LOC");
        assert_eq!(to_begin_tag("O"), "O");
    }

    #[test]
    fn test_illegal_sequence() {
        assert!(illegal_sequence("O", "I_LOC"));
        assert!(illegal_sequence("B_PER", "I_LOC"));
        assert!(!illegal_sequence("B_LOC", "I_LOC"));
        assert!(!illegal_sequence("I_LOC", "I_LOC"));
        assert!(!illegal_sequence("O", "B_LOC"));
        assert!(!illegal_sequence("I_LOC", "O"));
    }
}
