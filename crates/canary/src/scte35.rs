//! SegmentationTypeId -> name table (§6), stable across DASH and HLS paths.

/// Ad-break start segmentation type ids (§6, §4.5.1).
pub const AD_BREAK_START_TYPE_IDS: [u8; 5] = [34, 48, 50, 52, 54];

pub fn segmentation_type_name(id: u8) -> &'static str {
    match id {
        0 => "Not Indicated",
        1 => "Content Identification",
        16 => "Program Start",
        17 => "Program End",
        32 => "Chapter Start",
        33 => "Chapter End",
        34 => "Break Start",
        35 => "Break End",
        48 => "Provider Ad Start",
        49 => "Provider Ad End",
        50 => "Distributor Ad Start",
        51 => "Distributor Ad End",
        52 => "Provider Placement Opportunity Start",
        53 => "Provider Placement Opportunity End",
        54 => "Distributor Placement Opportunity Start",
        55 => "Distributor Placement Opportunity End",
        56 => "Provider Overlay Start",
        57 => "Provider Overlay End",
        58 => "Distributor Overlay Start",
        59 => "Distributor Overlay End",
        _ => "Unknown",
    }
}

pub fn is_ad_break_start(id: u8) -> bool {
    AD_BREAK_START_TYPE_IDS.contains(&id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn names_match_table() {
        assert_eq!(segmentation_type_name(52), "Provider Placement Opportunity Start");
        assert_eq!(segmentation_type_name(0), "Not Indicated");
        assert_eq!(segmentation_type_name(99), "Unknown");
    }

    #[rstest]
    #[case(34, "Break Start")]
    #[case(35, "Break End")]
    #[case(48, "Provider Ad Start")]
    #[case(49, "Provider Ad End")]
    #[case(50, "Distributor Ad Start")]
    #[case(54, "Distributor Placement Opportunity Start")]
    #[case(58, "Distributor Overlay Start")]
    fn every_named_entry_in_the_table_resolves(#[case] id: u8, #[case] name: &str) {
        assert_eq!(segmentation_type_name(id), name);
    }

    #[test]
    fn ad_break_start_set_matches_spec() {
        for id in [34u8, 48, 50, 52, 54] {
            assert!(is_ad_break_start(id));
        }
        assert!(!is_ad_break_start(35));
        assert!(!is_ad_break_start(17));
    }
}
