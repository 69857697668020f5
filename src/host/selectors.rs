//! Declarative selector programs
//!
//! A selector program is a small TOML document:
//!
//! ```toml
//! row-selector = "article"                  # optional: one record per match
//! skip-output-unless = "article"            # optional
//! skip-links-unless = ".listing"            # optional
//! enqueue = { selector = "a.next" }         # optional: enqueue_page for each href
//!
//! [fields]
//! title = "h2"                              # text of the first match
//! link = { selector = "a", attr = "href" }  # attribute of the first match
//! tags = { selector = ".tag", all = true }  # every match, as an array
//! ```

use crate::crawler::{element_text, parse_selector, PageContext};
use crate::host::{PageFunction, PageFunctionHost};
use crate::request::RequestSpec;
use crate::url::resolve_link;
use crate::ConfigError;
use async_trait::async_trait;
use scraper::{ElementRef, Selector};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ProgramSpec {
    #[serde(default)]
    row_selector: Option<String>,

    #[serde(default)]
    fields: BTreeMap<String, FieldSpec>,

    #[serde(default)]
    skip_output_unless: Option<String>,

    #[serde(default)]
    skip_links_unless: Option<String>,

    #[serde(default)]
    enqueue: Option<FieldSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldSpec {
    Selector(String),
    Detailed(DetailedField),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct DetailedField {
    selector: String,

    #[serde(default)]
    attr: Option<String>,

    #[serde(default)]
    all: bool,
}

impl FieldSpec {
    fn into_parts(self) -> DetailedField {
        match self {
            Self::Selector(selector) => DetailedField {
                selector,
                attr: None,
                all: false,
            },
            Self::Detailed(detailed) => detailed,
        }
    }
}

#[derive(Debug)]
struct Field {
    name: String,
    selector: Selector,
    attr: Option<String>,
    all: bool,
}

impl Field {
    fn extract(&self, scope: ElementRef<'_>) -> Value {
        let mut values = scope.select(&self.selector).map(|element| match &self.attr {
            Some(attr) => element
                .value()
                .attr(attr)
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
            None => Value::String(element_text(element)),
        });

        if self.all {
            Value::Array(values.collect())
        } else {
            values.next().unwrap_or(Value::Null)
        }
    }
}

/// What one run of a program decided for a page
#[derive(Debug, Default, PartialEq)]
struct Extraction {
    result: Value,
    skip_output: bool,
    skip_links: bool,
    enqueue: Vec<String>,
}

/// A compiled selector program
#[derive(Debug)]
pub struct SelectorProgram {
    rows: Option<Selector>,
    fields: Vec<Field>,
    skip_output_unless: Option<Selector>,
    skip_links_unless: Option<Selector>,
    enqueue: Option<(Selector, String)>,
}

impl SelectorProgram {
    /// Parses and compiles a program
    pub fn compile(source: &str) -> Result<Self, ConfigError> {
        let spec: ProgramSpec =
            toml::from_str(source).map_err(|e| ConfigError::PageFunction(e.to_string()))?;

        let selector = |raw: &str| {
            parse_selector(raw).map_err(|e| ConfigError::PageFunction(e.to_string()))
        };

        let fields = spec
            .fields
            .into_iter()
            .map(|(name, field)| {
                let field = field.into_parts();
                Ok(Field {
                    selector: selector(&field.selector)?,
                    name,
                    attr: field.attr,
                    all: field.all,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let enqueue = match spec.enqueue {
            Some(field) => {
                let field = field.into_parts();
                Some((
                    selector(&field.selector)?,
                    field.attr.unwrap_or_else(|| "href".to_string()),
                ))
            }
            None => None,
        };

        Ok(Self {
            rows: spec.row_selector.as_deref().map(selector).transpose()?,
            fields,
            skip_output_unless: spec.skip_output_unless.as_deref().map(selector).transpose()?,
            skip_links_unless: spec.skip_links_unless.as_deref().map(selector).transpose()?,
            enqueue,
        })
    }

    fn record(&self, scope: ElementRef<'_>) -> Value {
        let record: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.extract(scope)))
            .collect();
        Value::Object(record)
    }

    /// Runs the program against an HTML body
    fn extract(&self, body: &str, base: Option<&Url>) -> Extraction {
        let document = scraper::Html::parse_document(body);
        let root = document.root_element();

        let result = match &self.rows {
            Some(rows) => Value::Array(root.select(rows).map(|row| self.record(row)).collect()),
            None => self.record(root),
        };

        let missing = |selector: &Option<Selector>| {
            selector
                .as_ref()
                .is_some_and(|selector| root.select(selector).next().is_none())
        };

        let enqueue = match (&self.enqueue, base) {
            (Some((selector, attr)), Some(base)) => root
                .select(selector)
                .filter_map(|element| element.value().attr(attr))
                .filter_map(|href| resolve_link(href, base))
                .collect(),
            _ => Vec::new(),
        };

        Extraction {
            result,
            skip_output: missing(&self.skip_output_unless),
            skip_links: missing(&self.skip_links_unless),
            enqueue,
        }
    }
}

#[async_trait]
impl PageFunction for SelectorProgram {
    async fn call(&self, context: PageContext) -> anyhow::Result<Value> {
        let base = Url::parse(&context.request().url).ok();
        let extraction = self.extract(context.page().body(), base.as_ref());

        if extraction.skip_output {
            context.skip_output();
        }
        if extraction.skip_links {
            context.skip_links();
        }
        for url in extraction.enqueue {
            context.enqueue_page(RequestSpec::new(url)).await?;
        }

        Ok(extraction.result)
    }
}

/// Host for selector programs
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorHost;

impl PageFunctionHost for SelectorHost {
    fn compile(&self, source: &str) -> Result<Arc<dyn PageFunction>, ConfigError> {
        Ok(Arc::new(SelectorProgram::compile(source)?))
    }
}
