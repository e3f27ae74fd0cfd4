// src/reports_tests.rs

#[cfg(test)]
mod tests {
    use crate::domain::{Agent, AgentStatus, Contract, ContractStatus, Rank, TargetBook, TeamAllocation};
    use crate::hierarchy::ManagerOverrides;
    use crate::period::ReportMonth;
    use crate::reports::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::cmp::Ordering;

    // --- Helpers ---

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn march() -> ReportMonth {
        ReportMonth::parse("2024-03").unwrap()
    }

    fn build_agent(code: &str, name: &str, rank: Rank, group: Option<&str>, manager: Option<&str>) -> Agent {
        let mut agent = Agent::new(code, name, rank);
        agent.group_code = group.map(str::to_string);
        agent.manager_code = manager.map(str::to_string);
        agent
    }

    fn build_contract(
        policy: &str,
        agent: &str,
        fyp: Decimal,
        submit: Option<&str>,
        issue: Option<&str>,
        status: ContractStatus,
    ) -> Contract {
        Contract {
            policy_number: policy.to_string(),
            agent_code: agent.to_string(),
            fyp,
            submit_date: submit.map(d),
            issue_date: issue.map(d),
            status,
            ..Default::default()
        }
    }

    fn g1_team() -> Vec<Agent> {
        vec![
            build_agent("A001", "Nguyễn Văn An", Rank::Um, Some("G1"), None),
            build_agent("A002", "Trần Thị Bình", Rank::Fa, Some("G1"), Some("A001")),
        ]
    }

    // --- Manager Summary scenarios ---

    #[test]
    fn test_single_unit_issued_contract() {
        let contracts = vec![build_contract(
            "C1",
            "A002",
            dec!(1000),
            Some("2024-03-05"),
            Some("2024-03-10"),
            ContractStatus::Issued,
        )];

        let rows = manager_summary(
            &march(),
            &g1_team(),
            &contracts,
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );

        assert_eq!(rows.len(), 1, "exactly one unit expected");
        let row = &rows[0];
        assert_eq!(row.manager_code, "A001");
        assert_eq!(row.group_code, "G1");
        assert_eq!(row.manager_rank, "UM");
        assert_eq!(row.stats.total_agents, 2);
        assert_eq!(row.stats.submitted_fyp, dec!(1000));
        assert_eq!(row.stats.issued_fyp, dec!(1000));
        assert_eq!(row.stats.active_agents, 1);
        assert_eq!(row.stats.submitted_agents, 1);
        assert_eq!(row.stats.active_percent, 50.0);
        assert_eq!(row.stats.completion_percent, 0.0, "no target means zero completion");
    }

    #[test]
    fn test_cancelled_contract_counts_only_as_submitted() {
        let contracts = vec![build_contract(
            "C1",
            "A002",
            dec!(1000),
            Some("2024-03-05"),
            Some("2024-03-10"),
            ContractStatus::Cancelled,
        )];

        let rows = manager_summary(
            &march(),
            &g1_team(),
            &contracts,
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );

        let stats = &rows[0].stats;
        assert_eq!(stats.issued_fyp, Decimal::ZERO);
        assert_eq!(stats.submitted_fyp, dec!(1000));
        assert_eq!(stats.active_agents, 0);
        assert_eq!(stats.submitted_agents, 1);
    }

    #[test]
    fn test_terminated_leader_unit_produces_no_row() {
        let mut leader = build_agent("B001", "Lê Cũ", Rank::Unranked, Some("G2"), None);
        leader.status = AgentStatus::Terminated;
        let agents = vec![leader, build_agent("B002", "Phạm Mới", Rank::Fa, Some("G2"), Some("B001"))];

        let rows = manager_summary(
            &march(),
            &agents,
            &[],
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );
        assert!(rows.is_empty(), "G2 must not appear: {:?}", rows);
    }

    #[test]
    fn test_terminated_manager_rank_holder_is_skipped() {
        let mut agents = g1_team();
        agents[0].status = AgentStatus::Terminated;

        let rows = manager_summary(
            &march(),
            &agents,
            &[],
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );
        assert!(rows.is_empty());
    }

    #[test]
    fn test_bucket_keyed_by_non_manager_uses_member_manager() {
        let agents = vec![
            build_agent("U1", "Phạm Văn Uy", Rank::Um, Some("G9"), None),
            build_agent("A005", "Đỗ Thị Năm", Rank::Fa, Some("G9"), None),
            build_agent("F1", "Võ Văn Một", Rank::Fa, Some("A005"), Some("U1")),
        ];

        let rows = manager_summary(
            &march(),
            &agents,
            &[],
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );

        let mut units: Vec<(&str, &str)> = rows
            .iter()
            .map(|r| (r.group_code.as_str(), r.manager_code.as_str()))
            .collect();
        units.sort();
        assert_eq!(units, vec![("A005", "U1"), ("G9", "U1")]);
    }

    #[test]
    fn test_zero_headcount_and_target_never_yield_nan() {
        // Unit of an SM and an SA only: SM is excluded from headcount, SA is not reportable.
        let agents = vec![
            build_agent("S1", "Sếp", Rank::Sm, Some("G9"), None),
            build_agent("X1", "Mới", Rank::Sa, Some("G9"), Some("S1")),
        ];
        let rows = manager_summary(
            &march(),
            &agents,
            &[],
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );

        assert_eq!(rows.len(), 1);
        let stats = &rows[0].stats;
        assert_eq!(stats.total_agents, 0);
        assert_eq!(stats.active_percent, 0.0);
        assert_eq!(stats.completion_percent, 0.0);
        assert!(stats.active_percent.is_finite() && stats.completion_percent.is_finite());
        assert_eq!(rows[0].manager_rank, "SM");
    }

    #[test]
    fn test_completion_uses_manager_target() {
        let contracts = vec![build_contract(
            "C1",
            "A002",
            dec!(500),
            Some("2024-03-05"),
            Some("2024-03-10"),
            ContractStatus::Issued,
        )];
        let targets = TargetBook::from_allocations(&[TeamAllocation {
            month: "2024-03".into(),
            manager_code: "A001".into(),
            fyp_target: dec!(2000),
            active_target: 2,
        }]);

        let rows = manager_summary(&march(), &g1_team(), &contracts, &targets, &ManagerOverrides::default());
        assert_eq!(rows[0].stats.fyp_target, dec!(2000));
        assert_eq!(rows[0].stats.completion_percent, 25.0);
    }

    #[test]
    fn test_contracts_of_non_members_are_ignored() {
        let mut agents = g1_team();
        agents.push(build_agent("Z1", "Ngoài", Rank::Sa, Some("G1"), None));
        let contracts = vec![
            build_contract("C1", "Z1", dec!(900), Some("2024-03-01"), None, ContractStatus::Pending),
            build_contract("C2", "NOBODY", dec!(900), Some("2024-03-01"), None, ContractStatus::Pending),
        ];

        let rows = manager_summary(
            &march(),
            &agents,
            &contracts,
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );
        assert_eq!(rows[0].stats.submitted_fyp, Decimal::ZERO, "SA member is filtered out");
    }

    #[test]
    fn test_override_leader_row_reports_sm_rank() {
        let mut leader = build_agent("D2647", "TT SM", Rank::Unranked, Some("HQ"), None);
        leader.status = AgentStatus::Terminated;
        let agents = vec![
            leader,
            build_agent("F1", "Hoa", Rank::Fa, Some("SMTEAM"), Some("D2647")),
        ];

        let rows = manager_summary(
            &march(),
            &agents,
            &[],
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].manager_code, "D2647");
        assert_eq!(rows[0].manager_rank, "SM");
        assert_eq!(rows[0].group_code, "SMTEAM");
    }

    #[test]
    fn test_rows_sorted_by_name_ignoring_accents() {
        let agents = vec![
            build_agent("M1", "Đỗ Hùng", Rank::Um, Some("G1"), None),
            build_agent("M2", "bảo Anh", Rank::Um, Some("G2"), None),
            build_agent("M3", "Ánh Dương", Rank::Um, Some("G3"), None),
        ];
        let rows = manager_summary(
            &march(),
            &agents,
            &[],
            &TargetBook::default(),
            &ManagerOverrides::default(),
        );
        let names: Vec<&str> = rows.iter().map(|r| r.manager_name.as_str()).collect();
        assert_eq!(names, vec!["Ánh Dương", "bảo Anh", "Đỗ Hùng"]);
    }

    #[test]
    fn test_compare_names_tiebreak_is_raw_text() {
        assert_eq!(compare_names("an", "An"), Ordering::Greater, "'a' sorts after 'A' on tiebreak");
        assert_eq!(compare_names("Ân", "an"), Ordering::Greater);
        assert_eq!(compare_names("Ân", "Bo"), Ordering::Less, "accent does not push Â past B");
    }

    // --- Team Detail ---

    #[test]
    fn test_team_detail_member_order_and_working_months() {
        let mut fa_late = build_agent("F2", "Muộn", Rank::Fa, Some("G1"), Some("A001"));
        fa_late.join_date = Some(d("2024-01-10"));
        let mut fa_early = build_agent("F1", "Sớm", Rank::Fa, Some("G1"), Some("A001"));
        fa_early.join_date = Some(d("2022-11-01"));
        let fa_unknown = build_agent("F3", "Không rõ", Rank::Fa, Some("G1"), Some("A001"));
        let sum = build_agent("S1", "Phó", Rank::Sum, Some("G1"), None);

        let agents = vec![
            fa_late,
            build_agent("A001", "Trưởng", Rank::Um, Some("G1"), None),
            fa_early,
            sum,
            fa_unknown,
        ];
        let groups = team_detail(&march(), &agents, &[], &ManagerOverrides::default());

        assert_eq!(groups.len(), 1);
        let order: Vec<&str> = groups[0].items.iter().map(|i| i.agent.agent_code.as_str()).collect();
        assert_eq!(order, vec!["A001", "S1", "F3", "F1", "F2"]);

        let early = groups[0].items.iter().find(|i| i.agent.agent_code == "F1").unwrap();
        assert_eq!(early.stats.working_months, 16);
        let unknown = groups[0].items.iter().find(|i| i.agent.agent_code == "F3").unwrap();
        assert_eq!(unknown.stats.working_months, 0);
    }

    #[test]
    fn test_team_detail_summary_sums_members() {
        let contracts = vec![
            build_contract("C1", "A002", dec!(1000), Some("2024-03-05"), Some("2024-03-10"), ContractStatus::Issued),
            build_contract("C2", "A001", dec!(300), Some("2024-03-07"), None, ContractStatus::Pending),
            build_contract("C3", "A001", dec!(50), Some("2024-01-07"), None, ContractStatus::Pending),
        ];
        let groups = team_detail(&march(), &g1_team(), &contracts, &ManagerOverrides::default());

        let summary = &groups[0].summary;
        assert_eq!(summary.submitted_count, 2);
        assert_eq!(summary.submitted_fyp, dec!(1300));
        assert_eq!(summary.issued_count, 1);
        assert_eq!(summary.pending_count, 2, "pending is not bound to the month");
        assert_eq!(summary.pending_fyp, dec!(350));
    }

    #[test]
    fn test_team_detail_groups_sorted_and_empty_units_dropped() {
        let agents = vec![
            build_agent("B1", "B", Rank::Um, Some("GB"), None),
            build_agent("A1", "A", Rank::Um, Some("GA"), None),
            build_agent("D1", "D", Rank::Dm, Some("GD-PARENT"), None),
            build_agent("X1", "X", Rank::Sa, Some("D1"), None),
        ];
        let groups = team_detail(&march(), &agents, &[], &ManagerOverrides::default());
        let keys: Vec<&str> = groups.iter().map(|g| g.group_code.as_str()).collect();
        assert_eq!(keys, vec!["GA", "GB", "GD-PARENT"], "D1 bucket has only an SA and is omitted");
    }

    #[test]
    fn test_team_detail_serializes_original_field_names() {
        let groups = team_detail(&march(), &g1_team(), &[], &ManagerOverrides::default());
        let json = serde_json::to_value(&groups).unwrap();

        assert_eq!(json[0]["groupCode"], "G1");
        assert_eq!(json[0]["managerName"], "Nguyễn Văn An");
        assert!(json[0]["summary"].get("submittedFYP").is_some());
        assert!(json[0]["items"][0]["stats"].get("workingMonths").is_some());
        assert!(json[0]["items"][0]["stats"].get("issuedCount").is_some());
        assert_eq!(json[0]["items"][0]["agent"]["agent_code"], "A001");
    }
}
