//! Invariants of the report fold over arbitrary section outcomes

use proptest::prelude::*;

use compliance::report::{aggregate, CheckOutcome, CheckRecord, SectionOutcome};

fn outcome() -> impl Strategy<Value = CheckOutcome> {
    prop_oneof![
        (any::<bool>(), "[0-9]{1,4}", "[<>] [0-9]{1,4}")
            .prop_map(|(result, measured, expected)| CheckOutcome::completed(result, measured, expected)),
        Just(CheckOutcome::Skipped),
        "problem [a-c]".prop_map(CheckOutcome::major_problem),
    ]
}

fn section(index: usize) -> impl Strategy<Value = SectionOutcome> {
    let name = format!("section {}", index);
    prop_oneof![
        4 => prop::collection::vec(outcome(), 0..6).prop_map({
            let name = name.clone();
            move |outcomes| SectionOutcome::Completed {
                name: name.clone(),
                description: String::new(),
                checks: outcomes
                    .into_iter()
                    .enumerate()
                    .map(|(i, outcome)| CheckRecord {
                        name: format!("check {}", i),
                        description: String::new(),
                        outcome,
                    })
                    .collect(),
            }
        }),
        1 => "problem [a-c]".prop_map(move |problem| SectionOutcome::Failed {
            name: name.clone(),
            description: String::new(),
            major_problem: problem,
        }),
    ]
}

fn sections() -> impl Strategy<Value = Vec<SectionOutcome>> {
    (0usize..6).prop_flat_map(|n| (0..n).map(section).collect::<Vec<_>>())
}

fn reported_checks(outcome: &SectionOutcome) -> usize {
    match outcome {
        SectionOutcome::Completed { checks, .. } => checks
            .iter()
            .filter(|c| c.outcome != CheckOutcome::Skipped)
            .count(),
        SectionOutcome::Failed { .. } => 0,
    }
}

proptest! {
    #[test]
    fn report_passes_iff_every_section_passes(input in sections()) {
        let report = aggregate(input);
        prop_assert_eq!(report.result, report.sections.iter().all(|s| s.result));
    }

    #[test]
    fn section_passes_iff_every_check_passes(input in sections()) {
        let report = aggregate(input);
        for section in &report.sections {
            prop_assert_eq!(section.result, section.checks.iter().all(|c| c.check.result) && !section.checks.is_empty());
        }
    }

    #[test]
    fn skipped_checks_and_empty_sections_are_absent(input in sections()) {
        let expected: Vec<usize> = input
            .iter()
            .filter(|s| matches!(s, SectionOutcome::Failed { .. }) || reported_checks(s) > 0)
            .map(reported_checks)
            .collect();
        let report = aggregate(input);
        let actual: Vec<usize> = report.sections.iter().map(|s| s.checks.len()).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn major_problems_reach_every_level(input in sections()) {
        let report = aggregate(input);
        for section in &report.sections {
            for entry in &section.checks {
                if let Some(problem) = &entry.check.major_problem {
                    prop_assert!(!entry.check.result);
                    prop_assert!(section.major_problems.contains(problem));
                    prop_assert!(report.major_problems.contains(problem));
                }
            }
            for problem in &section.major_problems {
                prop_assert!(report.major_problems.contains(problem));
            }
        }
    }

    #[test]
    fn major_problems_are_distinct_and_sorted(input in sections()) {
        let report = aggregate(input);
        let lists = std::iter::once(&report.major_problems)
            .chain(report.sections.iter().map(|s| &s.major_problems));
        for problems in lists {
            prop_assert!(problems.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn section_order_is_input_order(input in sections()) {
        let expected: Vec<String> = input
            .iter()
            .filter(|s| matches!(s, SectionOutcome::Failed { .. }) || reported_checks(s) > 0)
            .map(|s| match s {
                SectionOutcome::Completed { name, .. } | SectionOutcome::Failed { name, .. } => name.clone(),
            })
            .collect();
        let report = aggregate(input);
        let actual: Vec<String> = report.sections.iter().map(|s| s.name.clone()).collect();
        prop_assert_eq!(actual, expected);
    }
}
