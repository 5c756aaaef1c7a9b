//! Rule evaluator: rules × wallet snapshot × prices → per-rule evaluations →
//! per-role decisions. Pure and deterministic; all I/O happens before this
//! module is called.

use std::collections::{BTreeMap, HashMap};

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::{
	sol::WalletSnapshot,
	store::types::{GatingRule, RuleKind},
};

/// Tri-valued outcome. `Indeterminate` means "evidence insufficient; do not
/// change state" and is distinct from both satisfied and unsatisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Satisfaction {
	Satisfied,
	Unsatisfied,
	Indeterminate,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
	pub rule_id: Uuid,
	pub role_id: String,
	pub satisfied: Satisfaction,
	pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleDecision {
	pub role_id: String,
	pub should_have: Satisfaction,
	pub matched_rule_ids: Vec<Uuid>,
}

/// One evaluation per rule, in input order.
pub fn evaluate(
	rules: &[GatingRule],
	snapshot: &WalletSnapshot,
	prices: &HashMap<String, BigDecimal>,
) -> Vec<Evaluation> {
	rules
		.iter()
		.map(|rule| {
			let (satisfied, reason) = evaluate_kind(&rule.kind, snapshot, prices);
			Evaluation { rule_id: rule.id, role_id: rule.role_id.clone(), satisfied, reason }
		})
		.collect()
}

fn evaluate_kind(
	kind: &RuleKind,
	snapshot: &WalletSnapshot,
	prices: &HashMap<String, BigDecimal>,
) -> (Satisfaction, String) {
	let zero = BigDecimal::from(0);

	match kind {
		RuleKind::TokenAmount { mint, threshold_amount } => {
			let balance = snapshot.token_balances_by_mint.get(mint).unwrap_or(&zero);
			let satisfied = balance >= threshold_amount;
			(
				satisfaction(satisfied),
				format!(
					"token balance {balance} of mint {mint} {} threshold {threshold_amount}",
					comparator(satisfied)
				),
			)
		},
		RuleKind::TokenUsd { mint, threshold_usd, price_asset_id } => {
			let balance = snapshot.token_balances_by_mint.get(mint).unwrap_or(&zero);
			match prices.get(price_asset_id) {
				None => (
					Satisfaction::Indeterminate,
					format!("no USD price available for asset {price_asset_id}"),
				),
				Some(price) => {
					let value = balance * price;
					let satisfied = &value >= threshold_usd;
					(
						satisfaction(satisfied),
						format!(
							"token balance {balance} of mint {mint} at {price} USD = {value} USD {} threshold {threshold_usd} USD",
							comparator(satisfied)
						),
					)
				},
			}
		},
		RuleKind::NftCollection { collection_address, threshold_count } => {
			let count = snapshot
				.nft_counts_by_verified_collection
				.get(collection_address)
				.copied()
				.unwrap_or(0);
			let satisfied = count >= *threshold_count;
			(
				satisfaction(satisfied),
				format!(
					"{count} verified NFTs in collection {collection_address} {} threshold {threshold_count}",
					comparator(satisfied)
				),
			)
		},
	}
}

fn satisfaction(satisfied: bool) -> Satisfaction {
	if satisfied {
		Satisfaction::Satisfied
	} else {
		Satisfaction::Unsatisfied
	}
}

fn comparator(satisfied: bool) -> &'static str {
	if satisfied {
		"meets"
	} else {
		"is below"
	}
}

/// Collapses evaluations into one decision per role. Rules targeting the
/// same role compose disjunctively: any satisfied rule wins the role; with
/// no satisfied rule, any indeterminate one forces "do not mutate".
pub fn decide(evaluations: &[Evaluation]) -> Vec<RoleDecision> {
	let mut by_role: BTreeMap<&str, Vec<&Evaluation>> = BTreeMap::new();
	for evaluation in evaluations {
		by_role.entry(&evaluation.role_id).or_default().push(evaluation);
	}

	by_role
		.into_iter()
		.map(|(role_id, group)| {
			let matched_rule_ids: Vec<Uuid> = group
				.iter()
				.filter(|e| e.satisfied == Satisfaction::Satisfied)
				.map(|e| e.rule_id)
				.collect();

			let should_have = if !matched_rule_ids.is_empty() {
				Satisfaction::Satisfied
			} else if group.iter().any(|e| e.satisfied == Satisfaction::Indeterminate) {
				Satisfaction::Indeterminate
			} else {
				Satisfaction::Unsatisfied
			};

			RoleDecision { role_id: role_id.to_string(), should_have, matched_rule_ids }
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use super::*;

	fn rule(role_id: &str, kind: RuleKind) -> GatingRule {
		GatingRule {
			id: Uuid::new_v4(),
			server_id: "guild-1".to_string(),
			role_id: role_id.to_string(),
			enabled: true,
			created_by: "operator".to_string(),
			kind,
		}
	}

	fn token_amount(role_id: &str, mint: &str, threshold: &str) -> GatingRule {
		rule(
			role_id,
			RuleKind::TokenAmount {
				mint: mint.to_string(),
				threshold_amount: BigDecimal::from_str(threshold).unwrap(),
			},
		)
	}

	fn snapshot_with_balance(mint: &str, balance: &str) -> WalletSnapshot {
		let mut snapshot = WalletSnapshot::default();
		snapshot
			.token_balances_by_mint
			.insert(mint.to_string(), BigDecimal::from_str(balance).unwrap());
		snapshot
	}

	#[test]
	fn token_amount_passes_at_equality() {
		let rules = [token_amount("R", "M", "100")];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "100"), &HashMap::new());

		assert_eq!(evaluations.len(), 1);
		assert_eq!(evaluations[0].satisfied, Satisfaction::Satisfied);

		let decisions = decide(&evaluations);
		assert_eq!(decisions.len(), 1);
		assert_eq!(decisions[0].role_id, "R");
		assert_eq!(decisions[0].should_have, Satisfaction::Satisfied);
		assert_eq!(decisions[0].matched_rule_ids, vec![rules[0].id]);
	}

	#[test]
	fn token_amount_missing_mint_counts_as_zero() {
		let rules = [token_amount("R", "M", "1")];
		let evaluations = evaluate(&rules, &WalletSnapshot::default(), &HashMap::new());
		assert_eq!(evaluations[0].satisfied, Satisfaction::Unsatisfied);
	}

	#[test]
	fn token_usd_without_price_is_indeterminate() {
		let rules = [rule(
			"R",
			RuleKind::TokenUsd {
				mint: "M".to_string(),
				threshold_usd: BigDecimal::from_str("10").unwrap(),
				price_asset_id: "sol".to_string(),
			},
		)];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "5"), &HashMap::new());
		assert_eq!(evaluations[0].satisfied, Satisfaction::Indeterminate);

		let decisions = decide(&evaluations);
		assert_eq!(decisions[0].should_have, Satisfaction::Indeterminate);
		assert!(decisions[0].matched_rule_ids.is_empty());
	}

	#[test]
	fn token_usd_with_price_compares_value() {
		let rules = [rule(
			"R",
			RuleKind::TokenUsd {
				mint: "M".to_string(),
				threshold_usd: BigDecimal::from_str("10").unwrap(),
				price_asset_id: "sol".to_string(),
			},
		)];
		let prices =
			HashMap::from([("sol".to_string(), BigDecimal::from_str("2.5").unwrap())]);

		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "4"), &prices);
		assert_eq!(evaluations[0].satisfied, Satisfaction::Satisfied);

		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "3.9"), &prices);
		assert_eq!(evaluations[0].satisfied, Satisfaction::Unsatisfied);
	}

	#[test]
	fn nft_collection_passes_at_threshold() {
		let rules = [rule(
			"R",
			RuleKind::NftCollection { collection_address: "C".to_string(), threshold_count: 2 },
		)];
		let mut snapshot = WalletSnapshot::default();
		snapshot.nft_counts_by_verified_collection.insert("C".to_string(), 2);

		let evaluations = evaluate(&rules, &snapshot, &HashMap::new());
		assert_eq!(evaluations[0].satisfied, Satisfaction::Satisfied);
	}

	#[test]
	fn or_composition_across_roles() {
		// role_1: one unsatisfied, one indeterminate; role_2: one satisfied.
		let rules = [
			token_amount("role_1", "M", "100"),
			rule(
				"role_1",
				RuleKind::TokenUsd {
					mint: "M".to_string(),
					threshold_usd: BigDecimal::from_str("10").unwrap(),
					price_asset_id: "sol".to_string(),
				},
			),
			token_amount("role_2", "M", "1"),
		];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "5"), &HashMap::new());
		let decisions = decide(&evaluations);

		assert_eq!(decisions.len(), 2);
		let role_1 = decisions.iter().find(|d| d.role_id == "role_1").unwrap();
		let role_2 = decisions.iter().find(|d| d.role_id == "role_2").unwrap();
		assert_eq!(role_1.should_have, Satisfaction::Indeterminate);
		assert_eq!(role_2.should_have, Satisfaction::Satisfied);
		assert_eq!(role_2.matched_rule_ids, vec![rules[2].id]);
	}

	#[test]
	fn satisfied_wins_over_indeterminate_within_role() {
		let rules = [
			rule(
				"R",
				RuleKind::TokenUsd {
					mint: "M".to_string(),
					threshold_usd: BigDecimal::from_str("10").unwrap(),
					price_asset_id: "sol".to_string(),
				},
			),
			token_amount("R", "M", "1"),
		];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "5"), &HashMap::new());
		let decisions = decide(&evaluations);

		assert_eq!(decisions.len(), 1);
		assert_eq!(decisions[0].should_have, Satisfaction::Satisfied);
		assert_eq!(decisions[0].matched_rule_ids, vec![rules[1].id]);
	}

	#[test]
	fn all_unsatisfied_means_unsatisfied() {
		let rules = [token_amount("R", "M", "100"), token_amount("R", "N", "100")];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "5"), &HashMap::new());
		let decisions = decide(&evaluations);
		assert_eq!(decisions[0].should_have, Satisfaction::Unsatisfied);
	}

	#[test]
	fn one_evaluation_per_rule_one_decision_per_role() {
		let rules = [
			token_amount("A", "M", "1"),
			token_amount("A", "M", "2"),
			token_amount("B", "M", "3"),
			token_amount("C", "M", "4"),
		];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "10"), &HashMap::new());
		assert_eq!(evaluations.len(), rules.len());

		let decisions = decide(&evaluations);
		assert_eq!(decisions.len(), 3);
	}

	#[test]
	fn decisions_are_deterministic() {
		let rules = [
			token_amount("B", "M", "1"),
			token_amount("A", "M", "1"),
			token_amount("C", "M", "100"),
		];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "10"), &HashMap::new());
		let first = decide(&evaluations);
		let second = decide(&evaluations);
		assert_eq!(first, second);
		// Grouped output is ordered by role id.
		let order: Vec<&str> = first.iter().map(|d| d.role_id.as_str()).collect();
		assert_eq!(order, vec!["A", "B", "C"]);
	}

	#[test]
	fn reasons_carry_operands() {
		let rules = [token_amount("R", "M", "100")];
		let evaluations = evaluate(&rules, &snapshot_with_balance("M", "42"), &HashMap::new());
		let reason = &evaluations[0].reason;
		assert!(reason.contains("42"));
		assert!(reason.contains("100"));
		assert!(reason.contains('M'));
	}
}
