use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::{
    ActionDef, AppendSourceDef, CheckKindDef, CheckNodeDef, CmpOp, CondExpr, FilterDef, InclLogic,
    RuleDef, RulesetDef, RulesetKind, parse_condition,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Parse a ruleset XML document.
///
/// Shape:
///
/// ```xml
/// <root type="DETECTION" name="login_rules">
///   <rule id="r1">
///     <filter field="data_type">login</filter>
///     <checklist condition="a and (b or not c)">
///       <node id="a" type="EQU" field="data_type">login</node>
///       <node id="b" type="REGEX" field="user">^admin</node>
///       <node id="c" type="INCL" field="tags" delimiter="," logic="OR">vpn,bastion</node>
///       <node id="d" type="NUMCMP" field="count" compare="gt">5</node>
///       <node id="e" type="PLUGIN" field="src_ip" plugin="is_private_ip"/>
///     </checklist>
///     <append field_name="severity">high</append>
///     <append field_name="geo" type="PLUGIN" plugin="geo_lookup" field="src_ip"/>
///     <del>tmp_a,tmp_b</del>
///     <plugin name="enrich" field="src_ip"/>
///   </rule>
/// </root>
/// ```
pub fn parse_ruleset(raw: &str) -> anyhow::Result<RulesetDef> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut parser = RulesetParser::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => parser.on_start(&e, false)?,
            Ok(Event::Empty(e)) => parser.on_start(&e, true)?,
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| anyhow::anyhow!("bad text: {e}"))?;
                parser.on_text(&text)?;
            }
            Ok(Event::End(e)) => parser.on_end(e.name().as_ref())?,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => anyhow::bail!("malformed XML: {e}"),
        }
    }
    parser.finish()
}

// ---------------------------------------------------------------------------
// Pull-parser state machine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RulesetParser {
    name: Option<String>,
    kind: Option<RulesetKind>,
    rules: Vec<RuleDef>,
    rule: Option<RuleBuilder>,
    /// Element currently awaiting its text content.
    pending_text: Option<TextSlot>,
}

#[derive(Default)]
struct RuleBuilder {
    id: String,
    filter: Option<FilterDef>,
    condition: Option<CondExpr>,
    in_checklist: bool,
    nodes: Vec<CheckNodeDef>,
    actions: Vec<ActionDef>,
}

enum TextSlot {
    Filter { field: String },
    Node { node: CheckNodeDef },
    Append { field: String },
    Del,
}

impl RulesetParser {
    fn on_start(&mut self, e: &BytesStart<'_>, empty: bool) -> anyhow::Result<()> {
        let tag = e.name().as_ref().to_vec();
        match tag.as_slice() {
            b"root" => self.start_root(e)?,
            b"rule" => self.start_rule(e)?,
            b"checklist" => self.start_checklist(e, empty)?,
            b"filter" => self.start_filter(e, empty)?,
            b"node" => self.start_node(e, empty)?,
            b"append" => self.start_append(e, empty)?,
            b"del" => self.start_del(empty)?,
            b"plugin" => self.start_plugin_action(e)?,
            other => anyhow::bail!(
                "unexpected element <{}>",
                String::from_utf8_lossy(other)
            ),
        }
        // Self-closing elements never receive text; flush the slot now.
        if empty && !matches!(tag.as_slice(), b"root" | b"rule" | b"checklist") {
            self.flush_text_slot(None)?;
        }
        Ok(())
    }

    fn on_text(&mut self, text: &str) -> anyhow::Result<()> {
        if self.pending_text.is_some() {
            self.flush_text_slot(Some(text))?;
        }
        Ok(())
    }

    fn on_end(&mut self, tag: &[u8]) -> anyhow::Result<()> {
        match tag {
            b"rule" => {
                let builder = self
                    .rule
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("</rule> without <rule>"))?;
                self.rules.push(builder.build()?);
            }
            b"checklist" => {
                if let Some(rule) = self.rule.as_mut() {
                    rule.in_checklist = false;
                }
            }
            b"filter" | b"node" | b"append" | b"del" => {
                // Empty text content (e.g. `<del></del>`) still needs a flush.
                self.flush_text_slot(None)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> anyhow::Result<RulesetDef> {
        let kind = self
            .kind
            .ok_or_else(|| anyhow::anyhow!("missing <root> element"))?;
        if self.rule.is_some() {
            anyhow::bail!("document ends inside an unterminated <rule>");
        }
        Ok(RulesetDef {
            name: self.name,
            kind,
            rules: self.rules,
        })
    }

    // -- element handlers ---------------------------------------------------

    fn start_root(&mut self, e: &BytesStart<'_>) -> anyhow::Result<()> {
        if self.kind.is_some() {
            anyhow::bail!("duplicate <root> element");
        }
        let mut kind = None;
        for attr in attrs(e)? {
            let (key, value) = attr;
            match key.as_str() {
                "type" => {
                    kind = Some(match value.as_str() {
                        "DETECTION" => RulesetKind::Detection,
                        "FILTER" => RulesetKind::Filter,
                        other => anyhow::bail!(
                            "unknown ruleset type {other:?} (expected DETECTION|FILTER)"
                        ),
                    })
                }
                "name" => self.name = Some(value),
                _ => {}
            }
        }
        self.kind = Some(kind.ok_or_else(|| anyhow::anyhow!("<root> requires a type attribute"))?);
        Ok(())
    }

    fn start_rule(&mut self, e: &BytesStart<'_>) -> anyhow::Result<()> {
        if self.kind.is_none() {
            anyhow::bail!("<rule> outside <root>");
        }
        if self.rule.is_some() {
            anyhow::bail!("nested <rule> elements are not allowed");
        }
        let mut builder = RuleBuilder::default();
        for (key, value) in attrs(e)? {
            if key == "id" {
                builder.id = value;
            }
        }
        if builder.id.is_empty() {
            anyhow::bail!("<rule> requires an id attribute");
        }
        self.rule = Some(builder);
        Ok(())
    }

    fn start_checklist(&mut self, e: &BytesStart<'_>, empty: bool) -> anyhow::Result<()> {
        let rule = self.require_rule("checklist")?;
        for (key, value) in attrs(e)? {
            if key == "condition" && !value.trim().is_empty() {
                rule.condition = Some(parse_condition(&value)?);
            }
        }
        // A self-closing checklist never sees an End event.
        rule.in_checklist = !empty;
        Ok(())
    }

    fn start_filter(&mut self, e: &BytesStart<'_>, _empty: bool) -> anyhow::Result<()> {
        self.require_rule("filter")?;
        let mut field = None;
        for (key, value) in attrs(e)? {
            if key == "field" {
                field = Some(value);
            }
        }
        let field = field.ok_or_else(|| anyhow::anyhow!("<filter> requires a field attribute"))?;
        self.pending_text = Some(TextSlot::Filter { field });
        Ok(())
    }

    fn start_node(&mut self, e: &BytesStart<'_>, _empty: bool) -> anyhow::Result<()> {
        let rule = self.require_rule("node")?;
        if !rule.in_checklist {
            anyhow::bail!("<node> outside <checklist>");
        }
        let mut id = None;
        let mut kind_name = None;
        let mut field = None;
        let mut delimiter = None;
        let mut logic = None;
        let mut compare = None;
        let mut plugin = None;
        for (key, value) in attrs(e)? {
            match key.as_str() {
                "id" => id = Some(value),
                "type" => kind_name = Some(value),
                "field" => field = Some(value),
                "delimiter" => delimiter = Some(value),
                "logic" => logic = Some(value),
                "compare" => compare = Some(value),
                "plugin" => plugin = Some(value),
                _ => {}
            }
        }
        let id = id.ok_or_else(|| anyhow::anyhow!("<node> requires an id attribute"))?;
        let field = field.ok_or_else(|| anyhow::anyhow!("node {id:?}: missing field attribute"))?;
        let kind_name =
            kind_name.ok_or_else(|| anyhow::anyhow!("node {id:?}: missing type attribute"))?;

        let kind = match kind_name.as_str() {
            "REGEX" => CheckKindDef::Regex,
            "INCL" => CheckKindDef::Incl {
                logic: match logic.as_deref() {
                    None => InclLogic::Single,
                    Some("OR") => InclLogic::Or,
                    Some("AND") => InclLogic::And,
                    Some(other) => {
                        anyhow::bail!("node {id:?}: unknown logic {other:?} (expected OR|AND)")
                    }
                },
                delimiter,
            },
            "EQU" => CheckKindDef::Equ,
            "NUMCMP" => CheckKindDef::NumCmp {
                op: CmpOp::parse(
                    compare
                        .as_deref()
                        .ok_or_else(|| anyhow::anyhow!("node {id:?}: NUMCMP needs compare"))?,
                )?,
            },
            "PLUGIN" => CheckKindDef::Plugin {
                plugin: plugin
                    .ok_or_else(|| anyhow::anyhow!("node {id:?}: PLUGIN needs plugin attribute"))?,
            },
            other => anyhow::bail!(
                "node {id:?}: unknown type {other:?} (expected REGEX|INCL|EQU|NUMCMP|PLUGIN)"
            ),
        };

        self.pending_text = Some(TextSlot::Node {
            node: CheckNodeDef {
                id,
                kind,
                field,
                value: String::new(),
            },
        });
        Ok(())
    }

    fn start_append(&mut self, e: &BytesStart<'_>, _empty: bool) -> anyhow::Result<()> {
        let rule = self.require_rule("append")?;
        let mut field_name = None;
        let mut is_plugin = false;
        let mut plugin = None;
        let mut args_field = None;
        for (key, value) in attrs(e)? {
            match key.as_str() {
                "field_name" => field_name = Some(value),
                "type" => is_plugin = value == "PLUGIN",
                "plugin" => plugin = Some(value),
                "field" => args_field = Some(value),
                _ => {}
            }
        }
        let field =
            field_name.ok_or_else(|| anyhow::anyhow!("<append> requires field_name attribute"))?;
        if is_plugin {
            let plugin =
                plugin.ok_or_else(|| anyhow::anyhow!("plugin append requires plugin attribute"))?;
            rule.actions.push(ActionDef::Append {
                field,
                source: AppendSourceDef::Plugin {
                    plugin,
                    args: split_fields(args_field.as_deref().unwrap_or_default()),
                },
            });
            // Plugin appends carry no text content worth keeping.
            self.pending_text = None;
        } else {
            self.pending_text = Some(TextSlot::Append { field });
        }
        Ok(())
    }

    fn start_del(&mut self, _empty: bool) -> anyhow::Result<()> {
        self.require_rule("del")?;
        self.pending_text = Some(TextSlot::Del);
        Ok(())
    }

    fn start_plugin_action(&mut self, e: &BytesStart<'_>) -> anyhow::Result<()> {
        let rule = self.require_rule("plugin")?;
        if rule.in_checklist {
            anyhow::bail!("checklist plugins are declared as <node type=\"PLUGIN\">");
        }
        let mut name = None;
        let mut args_field = None;
        for (key, value) in attrs(e)? {
            match key.as_str() {
                "name" => name = Some(value),
                "field" => args_field = Some(value),
                _ => {}
            }
        }
        rule.actions.push(ActionDef::Plugin {
            plugin: name.ok_or_else(|| anyhow::anyhow!("<plugin> requires a name attribute"))?,
            args: split_fields(args_field.as_deref().unwrap_or_default()),
        });
        Ok(())
    }

    // -- helpers ------------------------------------------------------------

    fn require_rule(&mut self, element: &str) -> anyhow::Result<&mut RuleBuilder> {
        self.rule
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("<{element}> outside <rule>"))
    }

    fn flush_text_slot(&mut self, text: Option<&str>) -> anyhow::Result<()> {
        let Some(slot) = self.pending_text.take() else {
            return Ok(());
        };
        let text = text.unwrap_or_default().trim();
        let rule = self
            .rule
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("content outside <rule>"))?;
        match slot {
            TextSlot::Filter { field } => {
                rule.filter = Some(FilterDef {
                    field,
                    value: text.to_string(),
                });
            }
            TextSlot::Node { mut node } => {
                node.value = text.to_string();
                rule.nodes.push(node);
            }
            TextSlot::Append { field } => {
                rule.actions.push(ActionDef::Append {
                    field,
                    source: AppendSourceDef::Literal(text.to_string()),
                });
            }
            TextSlot::Del => {
                let fields = split_fields(text);
                if fields.is_empty() {
                    anyhow::bail!("<del> requires a comma-separated field list");
                }
                rule.actions.push(ActionDef::Del { fields });
            }
        }
        Ok(())
    }
}

impl RuleBuilder {
    fn build(self) -> anyhow::Result<RuleDef> {
        // Every id referenced by the condition must exist as a node.
        if let Some(cond) = &self.condition {
            for id in cond.referenced_nodes() {
                if !self.nodes.iter().any(|n| n.id == id) {
                    anyhow::bail!("rule {:?}: condition references unknown node {id:?}", self.id);
                }
            }
        }
        Ok(RuleDef {
            id: self.id,
            filter: self.filter,
            condition: self.condition,
            nodes: self.nodes,
            actions: self.actions,
        })
    }
}

fn attrs(e: &BytesStart<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| anyhow::anyhow!("bad attribute: {e}"))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| anyhow::anyhow!("bad attribute value: {e}"))?
            .into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn split_fields(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
