use sqlx::{Postgres, QueryBuilder};

use crate::store::{DueFilter, JobCriteria, JobQuery, TenantScope};

/// Tenant restriction for hand-numbered statements. Binds a parameter only for
/// [`TenantScope::Tenant`].
pub fn tenant_clause(tenant: &TenantScope, param_ord: u8) -> String {
    match tenant {
        TenantScope::All => String::new(),
        TenantScope::NoTenant => "and tenant_id is null".to_string(),
        TenantScope::Tenant(_) => format!("and tenant_id = ${param_ord}::text"),
    }
}

fn push_tenant(builder: &mut QueryBuilder<'_, Postgres>, tenant: &TenantScope) {
    match tenant {
        TenantScope::All => {}
        TenantScope::NoTenant => {
            builder.push(" and tenant_id is null");
        }
        TenantScope::Tenant(tenant) => {
            builder.push(" and tenant_id = ").push_bind(tenant.clone());
        }
    }
}

pub fn push_due_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DueFilter) {
    if !filter.categories.is_empty() {
        builder
            .push(" and (category is null or category = any(")
            .push_bind(filter.categories.clone())
            .push("))");
    }
    push_tenant(builder, &filter.tenant);
}

fn push_criteria(builder: &mut QueryBuilder<'_, Postgres>, criteria: &JobCriteria) {
    builder.push("(true");
    if let Some(id) = criteria.id {
        builder.push(" and id = ").push_bind(id);
    }
    if let Some(correlation_id) = criteria.correlation_id {
        builder
            .push(" and correlation_id = ")
            .push_bind(correlation_id);
    }
    if let Some(handler_type) = &criteria.handler_type {
        builder
            .push(" and handler_type = ")
            .push_bind(handler_type.clone());
    }
    push_tenant(builder, &criteria.tenant);
    match criteria.locked {
        Some(true) => {
            builder.push(" and lock_owner is not null");
        }
        Some(false) => {
            builder.push(" and lock_owner is null");
        }
        None => {}
    }
    if let Some(before) = criteria.due_before {
        builder.push(" and due_date < ").push_bind(before);
    }
    match criteria.with_exception {
        Some(true) => {
            builder.push(" and exception_message is not null");
        }
        Some(false) => {
            builder.push(" and exception_message is null");
        }
        None => {}
    }
    if let Some(category) = &criteria.category {
        builder.push(" and category = ").push_bind(category.clone());
    }
    builder.push(")");
}

/// Appends ` where ...` for `query`.
pub fn push_job_query(builder: &mut QueryBuilder<'_, Postgres>, query: &JobQuery) {
    builder.push(" where ");
    push_criteria(builder, &query.criteria);
    if !query.or.is_empty() {
        builder.push(" and (false");
        for alternative in &query.or {
            builder.push(" or ");
            push_criteria(builder, alternative);
        }
        builder.push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn or_group_renders_as_alternatives() {
        let query = JobQuery::new(JobCriteria::new().locked(false))
            .or(JobCriteria::new().handler_type("mail"))
            .or(JobCriteria::new().tenant(TenantScope::NoTenant));

        let mut builder = QueryBuilder::<Postgres>::new("select * from jobs");
        push_job_query(&mut builder, &query);

        assert_eq!(
            builder.sql(),
            "select * from jobs where (true and lock_owner is null) and (false or (true and handler_type = $1) or (true and tenant_id is null))"
        );
    }

    #[test]
    fn tenant_clause_only_binds_for_a_named_tenant() {
        assert_eq!(tenant_clause(&TenantScope::All, 2), "");
        assert_eq!(
            tenant_clause(&TenantScope::NoTenant, 2),
            "and tenant_id is null"
        );
        assert_eq!(
            tenant_clause(&TenantScope::Tenant("acme".into()), 2),
            "and tenant_id = $2::text"
        );
    }
}
