// demos/audience_usage.rs
//
// Builds an audience's rule list step by step, shows how the group operation
// follows the rules, and exports the result in both fidelities.
//
// Run with: RUST_LOG=debug cargo run --example audience_usage

use std::sync::Arc;

use audience_engine::{
    AddRulesOptions, AudienceError, AudienceManager, AudienceProperties, Connective,
    EngineConfig, ExportMode, GroupOperation, InMemoryDirectory, NoopCompileTrigger, RuleSpec,
    ScopeLocator, ScopeRegistry,
};

fn main() -> Result<(), AudienceError> {
    env_logger::init();

    println!("=== Audience Rules ===\n");

    let registry = ScopeRegistry::new();
    registry.register(
        ScopeLocator::site("https://intranet.contoso.com"),
        Arc::new(InMemoryDirectory::new()),
    );
    let manager = AudienceManager::for_scope(
        &registry,
        &ScopeLocator::site("https://intranet.contoso.com/"),
        Arc::new(NoopCompileTrigger),
        EngineConfig::default(),
    )?;

    // ========================================================================
    // Example 1: create and append
    // ========================================================================
    let props = AudienceProperties::new()
        .description("Human resources")
        .owner("CONTOSO\\jane");
    manager.create_or_update("HR", &props, false)?;

    let hr = manager.add_rules(
        "HR",
        &[RuleSpec::new(Some("Department"), "Contains", Some("Sales"))],
        &AddRulesOptions::default(),
    )?;
    println!("After first batch: {:?} ({})", hr.rules().iter().map(|r| r.to_string()).collect::<Vec<_>>(), hr.group_operation());

    let options = AddRulesOptions::new().group_existing(true).append_op(Connective::Or);
    let hr = manager.add_rules("HR", &[RuleSpec::new(None, "member of", Some("Execs"))], &options)?;
    println!("After grouped OR:  {:?} ({})", hr.rules().iter().map(|r| r.to_string()).collect::<Vec<_>>(), hr.group_operation());

    // ========================================================================
    // Example 2: Mix is sticky
    // ========================================================================
    let (hr, _) = manager.create_or_update(
        "HR",
        &AudienceProperties::new().group_operation(GroupOperation::All),
        true,
    )?;
    println!("\nRequested All, still: {}", hr.group_operation());

    let hr = manager.clear_rules("HR")?;
    println!("After clear_rules:    {}", hr.group_operation());

    // ========================================================================
    // Example 3: rejected input leaves the audience alone
    // ========================================================================
    match manager.add_rules("HR", &[RuleSpec::new(Some("Title"), "Matches", Some("VP"))], &options) {
        Err(err) => println!("\nRejected: {}", err),
        Ok(_) => println!("\nUnexpectedly accepted"),
    }

    // ========================================================================
    // Example 4: export
    // ========================================================================
    manager.add_rules(
        "HR",
        &[
            RuleSpec::new(Some("Department"), "=", Some("HR")),
            RuleSpec::token("OR"),
            RuleSpec::new(None, "Reports Under", Some("CONTOSO\\ceo")),
        ],
        &AddRulesOptions::default(),
    )?;
    println!("\nExplicit:\n{}", manager.export_audience("HR", ExportMode::Explicit)?);
    println!("\nSemantic:\n{}", manager.export_audience("HR", ExportMode::Semantic)?);

    println!("\nAudit chain intact: {}", manager.verify_audit_chain());
    Ok(())
}
