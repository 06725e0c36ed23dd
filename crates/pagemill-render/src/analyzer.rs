//! Template analyzer: walks a compiled template's element tree counting
//! calls to the dynamic pool helpers. The per-helper maximum across all
//! active templates drives pool sizing.

use handlebars::template::{HelperTemplate, Parameter, Template, TemplateElement};
use handlebars::Path;
use pagemill_types::TemplateAnalysis;

/// Count the dynamic helper calls in one compiled template.
pub fn analyze_template(template: &Template) -> TemplateAnalysis {
    let mut analysis = TemplateAnalysis::default();
    walk(template, &mut analysis);
    analysis
}

fn walk(template: &Template, analysis: &mut TemplateAnalysis) {
    for element in &template.elements {
        match element {
            TemplateElement::Expression(helper) | TemplateElement::HtmlExpression(helper) => {
                count_call(helper, analysis);
            }
            TemplateElement::HelperBlock(helper) => {
                count_call(helper, analysis);
                if let Some(inner) = &helper.template {
                    walk(inner, analysis);
                }
                if let Some(inverse) = &helper.inverse {
                    walk(inverse, analysis);
                }
            }
            _ => {}
        }
    }
}

fn count_call(helper: &HelperTemplate, analysis: &mut TemplateAnalysis) {
    let Some(name) = parameter_name(&helper.name) else {
        return;
    };
    match name {
        "cls" => analysis.cls += 1,
        "random_url" => analysis.random_url += 1,
        "keyword_with_emoji" => analysis.keyword_with_emoji += 1,
        "random_keyword" => analysis.random_keyword += 1,
        "random_image" => analysis.random_image += 1,
        "random_content" => analysis.random_content += 1,
        _ => {}
    }
}

fn parameter_name(parameter: &Parameter) -> Option<&str> {
    match parameter {
        Parameter::Name(name) => Some(name.as_str()),
        Parameter::Path(path) => Some(match path {
            Path::Relative((_, raw)) => raw.as_str(),
            Path::Local((_, _, raw)) => raw.as_str(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> TemplateAnalysis {
        let template = Template::compile(source).expect("template compiles");
        analyze_template(&template)
    }

    #[test]
    fn counts_each_helper_kind() {
        let analysis = analyze(
            "<div class=\"{{cls}} {{cls}}\">\
             <a href=\"{{random_url}}\">{{keyword_with_emoji}}</a>\
             <img src=\"{{random_image}}\" alt=\"{{random_keyword}}\">\
             {{random_content}}</div>",
        );
        assert_eq!(
            analysis,
            TemplateAnalysis {
                cls: 2,
                random_url: 1,
                keyword_with_emoji: 1,
                random_keyword: 1,
                random_image: 1,
                random_content: 1,
            }
        );
    }

    #[test]
    fn counts_inside_blocks_and_else_branches() {
        let analysis = analyze(
            "{{#if spider}}{{cls}}{{random_url}}{{else}}{{cls}}{{/if}}\
             {{#each items}}{{random_keyword}}{{/each}}",
        );
        assert_eq!(analysis.cls, 2);
        assert_eq!(analysis.random_url, 1);
        assert_eq!(analysis.random_keyword, 1);
    }

    #[test]
    fn ignores_plain_variables_and_unknown_helpers(){
        let analysis = analyze("<title>{{title}}</title>{{format_date now}}{{body}}");
        assert_eq!(analysis, TemplateAnalysis::default());
    }

    #[test]
    fn triple_stash_calls_are_counted() {
        let analysis = analyze("{{{random_content}}}{{{random_content}}}");
        assert_eq!(analysis.random_content, 2);
    }
}
