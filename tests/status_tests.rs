use proxy_speed_rs::status::{parse_status_ranges, StatusRanges};

#[test]
fn parse_mixed_list() {
    let set = parse_status_ranges("200/204,300-301").unwrap();
    for code in [200, 204, 300, 301] {
        assert!(set.contains(code), "{code}");
    }
    for code in [201, 299, 302, 404] {
        assert!(!set.contains(code), "{code}");
    }
}

#[test]
fn from_str_matches_parser() {
    let set: StatusRanges = "204".parse().unwrap();
    assert_eq!(set, parse_status_ranges("204").unwrap());
    assert_eq!(set.to_string(), "204");
}

#[test]
fn trailing_separators_are_ignored() {
    let set = parse_status_ranges("200//204/").unwrap();
    assert_eq!(set.to_string(), "200/204");
}

#[test]
fn out_of_range_and_garbage_rejected() {
    assert!(parse_status_ranges("99").is_err());
    assert!(parse_status_ranges("600").is_err());
    assert!(parse_status_ranges("200-").is_err());
    assert!(parse_status_ranges("2xx").is_err());
}

#[test]
fn any_accepts_every_code() {
    let set = StatusRanges::any();
    assert!(set.is_empty());
    assert!(set.contains(100));
    assert!(set.contains(599));
}
