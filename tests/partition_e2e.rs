mod common;

use common::{api, listing, mount_default_listing, mount_listing};
use dragnet::listing::ListingClient;
use dragnet::models::{FacetFilter, Prefix, Sex, TextFacet};
use dragnet::partition::Partitioner;
use wiremock::MockServer;

#[tokio::test]
async fn light_nationality_is_walked_whole() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![("nationality", "AA")], listing(50, vec![], None)).await;
    mount_default_listing(&server, listing(0, vec![], None)).await;

    let client = ListingClient::new(api(&server));
    let plan = Partitioner::new(&client, vec!["AA".into()])
        .with_max_age(1)
        .plan()
        .await;

    let with_nationality: Vec<_> = plan
        .filters
        .iter()
        .filter(|f| f.nationality.is_some())
        .collect();
    assert_eq!(with_nationality, vec![&FacetFilter::nationality("AA")]);
    assert_eq!(plan.light, vec!["AA".to_string()]);
}

#[tokio::test]
async fn heavy_nationality_is_narrowed_then_fanned_out() {
    let server = MockServer::start().await;
    mount_listing(&server, vec![("nationality", "BB")], listing(500, vec![], None)).await;
    mount_listing(
        &server,
        vec![
            ("nationality", "BB"),
            ("ageMin", "0"),
            ("ageMax", "0"),
            ("sexId", "F"),
        ],
        listing(200, vec![], None),
    )
    .await;
    mount_default_listing(&server, listing(20, vec![], None)).await;

    let client = ListingClient::new(api(&server));
    let plan = Partitioner::new(&client, vec!["BB".into()])
        .with_max_age(1)
        .plan()
        .await;

    let bb = FacetFilter::nationality("BB");
    let hot = bb.clone().with_age(0).with_sex(Sex::Female);
    assert_eq!(plan.heavy, vec!["BB".to_string()]);
    assert!(!plan.filters.contains(&bb));
    assert!(!plan.filters.contains(&hot));

    for age in 0..=1 {
        for sex in Sex::ALL {
            let cell = bb.clone().with_age(age).with_sex(sex);
            if cell != hot {
                assert!(plan.filters.contains(&cell), "missing {cell}");
            }
        }
    }

    let fan_out: Vec<_> = plan
        .filters
        .iter()
        .filter(|f| f.is_narrowing_of(&hot))
        .collect();
    assert_eq!(fan_out.len(), 27 * 3);
    for prefix in Prefix::all() {
        for facet in TextFacet::ALL {
            assert!(fan_out.contains(&&hot.clone().with_prefix(facet, prefix)));
        }
    }

    // No other cell was over the cap, so nothing else fans out by age.
    let other_cell_fan_out = plan
        .filters
        .iter()
        .filter(|f| f.age.is_some() && f.text.is_some() && !f.is_narrowing_of(&hot))
        .count();
    assert_eq!(other_cell_fan_out, 0);
}

#[tokio::test]
async fn unreachable_api_over_fetches() {
    let server = MockServer::start().await;
    let client = ListingClient::new(api(&server));
    // Nothing mounted: every probe gets a 404.
    let plan = Partitioner::new(&client, vec!["AA".into(), "BB".into()])
        .with_max_age(0)
        .plan()
        .await;

    assert_eq!(plan.light, vec!["AA".to_string(), "BB".to_string()]);
    assert_eq!(plan.probe_failures, 2);
    assert!(plan.filters.contains(&FacetFilter::nationality("AA")));
    assert!(plan.filters.contains(&FacetFilter::nationality("BB")));
}
