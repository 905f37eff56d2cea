//! Property tests: the HTML page and its JSON summary describe the same tree.

use proptest::prelude::*;

use docs_builder::{BuildConfig, DocsBuilder};

const ADORNMENTS: [char; 4] = ['=', '-', '~', '^'];

/// Section levels where each level is at most one deeper than the previous.
fn levels() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..4, 1..8).prop_map(|steps| {
        let mut levels = vec![1];
        for step in steps.into_iter().skip(1) {
            let previous = *levels.last().unwrap();
            levels.push(step.clamp(1, previous + 1).min(ADORNMENTS.len()));
        }
        levels
    })
}

fn document() -> impl Strategy<Value = Vec<(usize, String)>> {
    levels().prop_flat_map(|levels| {
        let titles = prop::collection::vec("[A-Z][a-z]{2,10}( [a-z]{2,8}){0,2}", levels.len());
        (Just(levels), titles)
            .prop_map(|(levels, titles)| levels.into_iter().zip(titles).collect())
    })
}

fn to_rst(sections: &[(usize, String)]) -> String {
    let mut rst = String::new();
    for (level, title) in sections {
        let underline = ADORNMENTS[level - 1].to_string().repeat(title.chars().count());
        rst.push_str(&format!("{}\n{}\n\nSome text about {}.\n\n", title, underline, title));
    }
    rst
}

fn builder() -> DocsBuilder {
    let mut config = BuildConfig::new();
    config.set_content_is_string(true);
    DocsBuilder::new(config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn html_and_json_share_titles_and_headings(sections in document()) {
        let page = builder().build_string(&to_rst(&sections)).unwrap();
        let json: serde_json::Value = serde_json::from_str(page.json.as_deref().unwrap()).unwrap();

        prop_assert_eq!(json["title"].as_str().unwrap(), page.title.as_str());
        prop_assert_eq!(page.title.as_str(), sections[0].1.as_str());
        prop_assert_eq!(json["body"].as_str().unwrap(), page.body.as_str());

        let toc = json["toc"].as_array().unwrap();
        prop_assert_eq!(toc.len(), sections.len());
        for ((level, title), entry) in sections.iter().zip(toc) {
            prop_assert_eq!(entry["title"].as_str().unwrap(), title.as_str());
            prop_assert_eq!(entry["level"].as_u64().unwrap() as usize, *level);
            let anchor = entry["anchor"].as_str().unwrap();
            let id_attribute = format!("id=\"{}\"", anchor);
            prop_assert!(page.html.contains(&id_attribute));
        }
    }
}
