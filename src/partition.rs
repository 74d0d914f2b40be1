use crate::config::MAX_AGE;
use crate::listing::{CountSource, MatchCount};
use crate::models::{FacetFilter, Prefix, Sex, TextFacet};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

/// Filters to walk plus how the nationalities were classified on the way.
#[derive(Debug, Default)]
pub struct PartitionPlan {
    pub filters: Vec<FacetFilter>,
    pub light: Vec<String>,
    pub heavy: Vec<String>,
    pub probes: u64,
    pub probe_failures: u64,
}

/// Splits the listing endpoint's query space into filters that each fit
/// under the result cap.
///
/// Nationalities at or under the cap are walked as-is. Heavy ones are swept
/// by exact age and sex; any (age, sex) cell still over the cap is fanned out
/// by a single leading character on forename, name and free text. Cells are
/// not re-probed after that fan-out. Nationality-less filters close the plan
/// so records without a nationality facet are still reached.
pub struct Partitioner<'a, C: CountSource + ?Sized> {
    counts: &'a C,
    nationalities: Vec<String>,
    max_age: u8,
}

impl<'a, C: CountSource + ?Sized> Partitioner<'a, C> {
    pub fn new(counts: &'a C, nationalities: Vec<String>) -> Self {
        Self {
            counts,
            nationalities,
            max_age: MAX_AGE,
        }
    }

    pub fn with_max_age(mut self, max_age: u8) -> Self {
        self.max_age = max_age;
        self
    }

    pub async fn plan(&self) -> PartitionPlan {
        let mut plan = PartitionPlan::default();
        let pb = make_spinner();

        pb.set_message("Classifying nationalities");
        for code in &self.nationalities {
            let filter = FacetFilter::nationality(code);
            if self.is_heavy(&filter, &mut plan).await {
                plan.heavy.push(code.clone());
            } else {
                plan.light.push(code.clone());
            }
            pb.tick();
        }
        info!(
            light = plan.light.len(),
            heavy = plan.heavy.len(),
            "Nationalities classified"
        );

        for code in &plan.light {
            plan.filters.push(FacetFilter::nationality(code));
        }

        let heavy = plan.heavy.clone();
        for code in &heavy {
            pb.set_message(format!("Narrowing heavy nationality {code}"));
            self.narrow_heavy(code, &mut plan, &pb).await;
        }

        self.push_without_nationality(&mut plan.filters);
        pb.finish_and_clear();

        info!(
            filters = plan.filters.len(),
            probes = plan.probes,
            probe_failures = plan.probe_failures,
            "Query space partitioned"
        );
        plan
    }

    /// A failed probe counts as light: walking a filter that turns out to be
    /// over the cap loses less than skipping one.
    async fn is_heavy(&self, filter: &FacetFilter, plan: &mut PartitionPlan) -> bool {
        plan.probes += 1;
        match self.counts.probe(filter).await {
            Ok(MatchCount::Known(total)) => {
                debug!(filter = %filter, total, "Probed");
                MatchCount::Known(total).exceeds_cap()
            }
            Ok(MatchCount::Unknown) => {
                debug!(filter = %filter, "Probe reported no total, treating as light");
                false
            }
            Err(e) => {
                plan.probe_failures += 1;
                warn!(filter = %filter, error = %e, "Probe failed, treating as light");
                false
            }
        }
    }

    async fn narrow_heavy(&self, code: &str, plan: &mut PartitionPlan, pb: &ProgressBar) {
        let country = FacetFilter::nationality(code);

        for age in 0..=self.max_age {
            for sex in Sex::ALL {
                let cell = country.clone().with_age(age).with_sex(sex);
                if self.is_heavy(&cell, plan).await {
                    push_prefix_fan_out(&cell, &mut plan.filters);
                } else {
                    plan.filters.push(cell);
                }
                pb.tick();
            }
        }

        // Records without a recorded age never match an age cell.
        for sex in Sex::ALL {
            let by_sex = country.clone().with_sex(sex);
            plan.filters.push(by_sex.clone());
            for prefix in Prefix::all() {
                for facet in [TextFacet::Name, TextFacet::Forename, TextFacet::FreeText] {
                    plan.filters.push(by_sex.clone().with_prefix(facet, prefix));
                }
            }
        }
    }

    fn push_without_nationality(&self, filters: &mut Vec<FacetFilter>) {
        for age in 0..=self.max_age {
            for sex in Sex::ALL {
                filters.push(FacetFilter::unfiltered().with_age(age).with_sex(sex));
            }
        }
        for age in 0..=self.max_age {
            filters.push(FacetFilter::unfiltered().with_age(age));
        }
        for sex in Sex::ALL {
            filters.push(FacetFilter::unfiltered().with_sex(sex));
        }
        filters.push(FacetFilter::unfiltered());
    }
}

fn push_prefix_fan_out(cell: &FacetFilter, filters: &mut Vec<FacetFilter>) {
    for prefix in Prefix::all() {
        for facet in TextFacet::ALL {
            filters.push(cell.clone().with_prefix(facet, prefix));
        }
    }
}

fn make_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb
}
