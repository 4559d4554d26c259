//! Standings and podium grouping over finished athletes.

use std::collections::{BTreeMap, HashSet};

use crate::athlete::{Athlete, Sex};
use crate::ledger::{SortKey, sort_athletes};

const GENERAL_PODIUM_SIZE: usize = 5;
const BAND_PODIUM_SIZE: usize = 3;

/// Finished athletes ordered by net time, fastest first.
pub fn standings(athletes: &[Athlete]) -> Vec<Athlete> {
    let mut finished: Vec<Athlete> = athletes.iter().filter(|a| a.has_finished()).cloned().collect();
    sort_athletes(&mut finished, SortKey::NetTime, false);
    finished
}

/// Age band label: "Até 19", five-year bands such as "35-39", then "70+".
pub fn age_band_label(age: u32) -> String {
    match age {
        0..=19 => "Até 19".to_string(),
        70.. => "70+".to_string(),
        _ => {
            let low = age / 5 * 5;
            format!("{low}-{}", low + 4)
        }
    }
}

/// Lower bound of an age band, for ordering bands youngest first.
fn band_floor(age: u32) -> u32 {
    match age {
        0..=19 => 0,
        70.. => 70,
        _ => age / 5 * 5,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PodiumGroup {
    pub title: String,
    pub entries: Vec<Athlete>,
}

fn sex_label(sex: Sex) -> &'static str {
    match sex {
        Sex::Male => "Masculino",
        Sex::Female => "Feminino",
    }
}

/// Groups finished athletes into podiums.
///
/// Order: general top 5 per sex (non-PCD), complete PCD lists per sex, then
/// general age bands (top 3, skipping anyone already on a general podium),
/// then PCD age bands (top 3).
pub fn podium_report(athletes: &[Athlete]) -> Vec<PodiumGroup> {
    let ranked = standings(athletes);
    let mut groups = Vec::new();
    let sexes = [Sex::Male, Sex::Female];

    let of = |pcd: bool, sex: Sex| -> Vec<&Athlete> {
        ranked
            .iter()
            .filter(|a| a.is_pcd() == pcd && a.sex == sex)
            .collect()
    };

    let mut on_general_podium = HashSet::new();
    for sex in sexes {
        let top: Vec<Athlete> = of(false, sex)
            .into_iter()
            .take(GENERAL_PODIUM_SIZE)
            .cloned()
            .collect();
        on_general_podium.extend(top.iter().map(|a| a.num));
        groups.push(PodiumGroup {
            title: format!("Pódio Geral {} (Top {GENERAL_PODIUM_SIZE})", sex_label(sex)),
            entries: top,
        });
    }

    for sex in sexes {
        let all: Vec<Athlete> = of(true, sex).into_iter().cloned().collect();
        if !all.is_empty() {
            groups.push(PodiumGroup {
                title: format!("Pódio PCD {} (Geral)", sex_label(sex)),
                entries: all,
            });
        }
    }

    for (pcd, prefix) in [(false, "GERAL"), (true, "PCD")] {
        for sex in sexes {
            let mut bands: BTreeMap<u32, Vec<Athlete>> = BTreeMap::new();
            for athlete in of(pcd, sex) {
                if !pcd && on_general_podium.contains(&athlete.num) {
                    continue;
                }
                let band = bands.entry(band_floor(athlete.age)).or_default();
                if band.len() < BAND_PODIUM_SIZE {
                    band.push(athlete.clone());
                }
            }
            for entries in bands.into_values() {
                let label = age_band_label(entries[0].age);
                groups.push(PodiumGroup {
                    title: format!("{prefix} {} {label}", sex_label(sex)),
                    entries,
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::athlete::Arrival;

    fn finisher(num: u32, sex: Sex, age: u32, category: &str, net: Option<f64>) -> Athlete {
        let at = NaiveDate::from_ymd_opt(2025, 6, 15)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap();
        Athlete {
            num,
            name: format!("Athlete {num}"),
            sex,
            birth_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            age,
            category: category.to_string(),
            modality: "5K".into(),
            arrival: net.map(|net_seconds| Arrival { at, net_seconds }),
        }
    }

    fn nums(group: &PodiumGroup) -> Vec<u32> {
        group.entries.iter().map(|a| a.num).collect()
    }

    #[test]
    fn band_labels() {
        assert_eq!(age_band_label(12), "Até 19");
        assert_eq!(age_band_label(19), "Até 19");
        assert_eq!(age_band_label(20), "20-24");
        assert_eq!(age_band_label(37), "35-39");
        assert_eq!(age_band_label(69), "65-69");
        assert_eq!(age_band_label(70), "70+");
        assert_eq!(age_band_label(88), "70+");
    }

    #[test]
    fn standings_skip_unfinished() {
        let athletes = vec![
            finisher(1, Sex::Male, 30, "GERAL", Some(300.0)),
            finisher(2, Sex::Male, 30, "GERAL", None),
            finisher(3, Sex::Female, 30, "GERAL", Some(200.0)),
        ];
        let order: Vec<u32> = standings(&athletes).iter().map(|a| a.num).collect();
        assert_eq!(order, vec![3, 1]);
    }

    #[test]
    fn general_podium_excludes_band_winners() {
        // Seven men aged 30-34: five make the general podium, two remain.
        let mut athletes: Vec<Athlete> = (1..=7)
            .map(|n| finisher(n, Sex::Male, 32, "GERAL", Some(100.0 * n as f64)))
            .collect();
        athletes.push(finisher(20, Sex::Female, 41, "GERAL", Some(500.0)));
        athletes.push(finisher(30, Sex::Male, 45, "PCD", Some(900.0)));
        athletes.push(finisher(31, Sex::Male, 46, "PCD", Some(800.0)));

        let report = podium_report(&athletes);
        let titles: Vec<&str> = report.iter().map(|g| g.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Pódio Geral Masculino (Top 5)",
                "Pódio Geral Feminino (Top 5)",
                "Pódio PCD Masculino (Geral)",
                "GERAL Masculino 30-34",
                "PCD Masculino 45-49",
            ]
        );
        assert_eq!(nums(&report[0]), vec![1, 2, 3, 4, 5]);
        assert_eq!(nums(&report[1]), vec![20]);
        assert_eq!(nums(&report[2]), vec![31, 30]);
        assert_eq!(nums(&report[3]), vec![6, 7]);
        assert_eq!(nums(&report[4]), vec![31, 30]);
    }

    #[test]
    fn bands_keep_top_three_youngest_first() {
        let athletes = vec![
            finisher(1, Sex::Female, 72, "GERAL", Some(10.0)),
            finisher(2, Sex::Female, 72, "GERAL", Some(20.0)),
            finisher(3, Sex::Female, 72, "GERAL", Some(30.0)),
            finisher(4, Sex::Female, 72, "GERAL", Some(40.0)),
            finisher(5, Sex::Female, 72, "GERAL", Some(50.0)),
            finisher(6, Sex::Female, 71, "GERAL", Some(60.0)),
            finisher(7, Sex::Female, 71, "GERAL", Some(70.0)),
            finisher(8, Sex::Female, 71, "GERAL", Some(80.0)),
            finisher(9, Sex::Female, 71, "GERAL", Some(90.0)),
            finisher(10, Sex::Female, 18, "GERAL", Some(95.0)),
        ];
        let report = podium_report(&athletes);
        let bands: Vec<&PodiumGroup> = report.iter().skip(2).collect();
        assert_eq!(bands[0].title, "GERAL Feminino Até 19");
        assert_eq!(nums(bands[0]), vec![10]);
        assert_eq!(bands[1].title, "GERAL Feminino 70+");
        assert_eq!(nums(bands[1]), vec![6, 7, 8]);
    }
}
