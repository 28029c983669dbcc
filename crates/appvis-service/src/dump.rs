//! Textual diagnostics for the filter state.
//!
//! Prints the master-switch state, the force-queryable set, and the
//! per-caller target lists of each relation map. App ids are expanded to
//! package names through a caller-supplied resolver (the surrounding
//! service knows the uid -> packages mapping); resolutions are memoized
//! for the duration of one dump.

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

use appvis_core::ident::{AppId, Uid, UserId};

use crate::filter::{VisibilityFilter, DEBUG_LOGGING};

/// Memoizing app-id -> display-name expansion.
struct NameExpander<'a> {
    resolve: &'a mut dyn FnMut(AppId) -> Option<Vec<String>>,
    cache: HashMap<AppId, String>,
}

impl NameExpander<'_> {
    fn expand(&mut self, app_id: AppId) -> String {
        if let Some(hit) = self.cache.get(&app_id) {
            return hit.clone();
        }
        let rendered = match (self.resolve)(app_id) {
            None => format!("[unknown app id {app_id}]"),
            Some(names) if names.is_empty() => format!("[unknown app id {app_id}]"),
            Some(names) if names.len() == 1 => names.into_iter().next().unwrap_or_default(),
            Some(names) => format!("[{}]", names.join(",")),
        };
        self.cache.insert(app_id, rendered.clone());
        rendered
    }
}

impl VisibilityFilter {
    /// Writes the diagnostic dump of the relation maps.
    ///
    /// With `filter_app_id` the output is restricted to rows involving
    /// that app id; a caller row matching it prints its full target list.
    ///
    /// # Errors
    ///
    /// Propagates write failures from `writer`.
    pub fn dump_queries(
        &self,
        writer: &mut dyn Write,
        filter_app_id: Option<AppId>,
        users: &[UserId],
        resolve: &mut dyn FnMut(AppId) -> Option<Vec<String>>,
    ) -> io::Result<()> {
        let mut expander = NameExpander {
            resolve,
            cache: HashMap::new(),
        };
        writeln!(writer)?;
        writeln!(writer, "Queries:")?;
        if !self.feature_config().is_globally_enabled() {
            writeln!(writer, "  DISABLED")?;
            if !DEBUG_LOGGING {
                return Ok(());
            }
        }
        let store = self.relations_for_dump();
        writeln!(
            writer,
            "  system apps queryable: {}",
            store.system_apps_queryable()
        )?;
        dump_app_set(
            writer,
            filter_app_id,
            store.force_queryable_set(),
            "forceQueryable",
            "  ",
            &mut expander,
        )?;
        writeln!(writer, "  queries via package name:")?;
        dump_app_map(writer, filter_app_id, store.package_edges(), "    ", &mut expander)?;
        writeln!(writer, "  queries via intent:")?;
        dump_app_map(
            writer,
            filter_app_id,
            store.component_edges(),
            "    ",
            &mut expander,
        )?;
        writeln!(writer, "  queryable via interaction:")?;
        for &user in users {
            writeln!(writer, "    User {user}:")?;
            dump_uid_map(
                writer,
                filter_app_id.map(|app_id| Uid::new(user, app_id)),
                store.implicit_edges(),
                "      ",
                &mut expander,
            )?;
        }
        Ok(())
    }
}

fn dump_app_set(
    writer: &mut dyn Write,
    filtering: Option<AppId>,
    set: &HashSet<AppId>,
    subtitle: &str,
    spacing: &str,
    expander: &mut NameExpander<'_>,
) -> io::Result<()> {
    if set.is_empty() {
        return Ok(());
    }
    if let Some(filtering) = filtering {
        if !set.contains(&filtering) {
            return Ok(());
        }
    }
    writeln!(writer, "{spacing}{subtitle}:")?;
    let mut items: Vec<_> = set.iter().copied().collect();
    items.sort_unstable();
    for item in items {
        if filtering.is_none() || filtering == Some(item) {
            writeln!(writer, "{spacing}  {}", expander.expand(item))?;
        }
    }
    Ok(())
}

fn dump_app_map(
    writer: &mut dyn Write,
    filtering: Option<AppId>,
    map: &HashMap<AppId, HashSet<AppId>>,
    spacing: &str,
    expander: &mut NameExpander<'_>,
) -> io::Result<()> {
    let mut callers: Vec<_> = map.keys().copied().collect();
    callers.sort_unstable();
    for caller in callers {
        let targets = &map[&caller];
        // Target lists are not filtered when the caller itself is the
        // filtered id.
        let row_filter = if filtering == Some(caller) { None } else { filtering };
        if let Some(required) = row_filter {
            if !targets.contains(&required) {
                continue;
            }
        }
        writeln!(writer, "{spacing}{}:", expander.expand(caller))?;
        let mut sorted: Vec<_> = targets.iter().copied().collect();
        sorted.sort_unstable();
        for target in sorted {
            if row_filter.is_none() || row_filter == Some(target) {
                writeln!(writer, "{spacing}  {}", expander.expand(target))?;
            }
        }
    }
    Ok(())
}

fn dump_uid_map(
    writer: &mut dyn Write,
    filtering: Option<Uid>,
    map: &HashMap<Uid, HashSet<Uid>>,
    spacing: &str,
    expander: &mut NameExpander<'_>,
) -> io::Result<()> {
    let mut callers: Vec<_> = map.keys().copied().collect();
    callers.sort_unstable();
    for caller in callers {
        let targets = &map[&caller];
        let row_filter = if filtering == Some(caller) { None } else { filtering };
        if let Some(required) = row_filter {
            if !targets.contains(&required) {
                continue;
            }
        }
        writeln!(
            writer,
            "{spacing}user {}/{}:",
            caller.user_id(),
            expander.expand(caller.app_id())
        )?;
        let mut sorted: Vec<_> = targets.iter().copied().collect();
        sorted.sort_unstable();
        for target in sorted {
            if row_filter.is_none() || row_filter == Some(target) {
                writeln!(
                    writer,
                    "{spacing}  user {}/{}",
                    target.user_id(),
                    expander.expand(target.app_id())
                )?;
            }
        }
    }
    Ok(())
}
