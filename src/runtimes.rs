//! ServingRuntime resolution: lookup by name, validation against a model, and
//! auto-selection across all enabled runtimes.
//!
//! Namespaced runtimes shadow cluster-scoped runtimes of the same name, both
//! in point lookup and in enumeration.

use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use crate::crd::{
    ClusterServingRuntime, InferenceService, ModelSpec, RuntimeSpec, ServingRuntime,
    SupportedModelFormat,
};
use crate::error::{Error, Result};

/// A runtime that passed matching, with the winning format record.
#[derive(Debug, Clone)]
pub struct ResolvedRuntime {
    pub name: String,
    pub cluster_scoped: bool,
    pub spec: RuntimeSpec,
    pub format: SupportedModelFormat,
}

/// An enumerated runtime before matching.
#[derive(Debug, Clone)]
pub struct RuntimeCandidate {
    pub name: String,
    pub cluster_scoped: bool,
    pub spec: RuntimeSpec,
}

/// Parse a human-readable parameter count: "7B" -> 7e9, "350M" -> 3.5e8.
/// Bare numbers are taken literally; the suffix is case-insensitive.
pub fn parse_parameter_size(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, multiplier) = match s.chars().last() {
        Some(c) if c.eq_ignore_ascii_case(&'k') => (&s[..s.len() - 1], 1e3),
        Some(c) if c.eq_ignore_ascii_case(&'m') => (&s[..s.len() - 1], 1e6),
        Some(c) if c.eq_ignore_ascii_case(&'b') => (&s[..s.len() - 1], 1e9),
        Some(c) if c.eq_ignore_ascii_case(&'t') => (&s[..s.len() - 1], 1e12),
        _ => (s, 1.0),
    };
    digits.parse::<f64>().ok().map(|n| n * multiplier)
}

/// True when the model's parameter size lies within the runtime's declared
/// range. Models without a size, and runtimes without a range, always pass.
pub fn size_in_range(spec: &RuntimeSpec, model: &ModelSpec) -> bool {
    let Some(size) = model
        .model_parameter_size
        .as_deref()
        .and_then(parse_parameter_size)
    else {
        return true;
    };
    let Some(range) = &spec.model_size_range else {
        return true;
    };
    if let Some(min) = range.min.as_deref().and_then(parse_parameter_size) {
        if size < min {
            return false;
        }
    }
    if let Some(max) = range.max.as_deref().and_then(parse_parameter_size) {
        if size > max {
            return false;
        }
    }
    true
}

/// Match one supported format against a model.
///
/// Every attribute the format declares must agree with the model; the score is
/// the most specific agreeing attribute, descending: architecture (5),
/// framework (4), format name+version (3), quantization (2), name-only (1).
/// Returns `None` on any contradiction or when the family name differs.
pub fn format_match_score(fmt: &SupportedModelFormat, model: &ModelSpec) -> Option<u8> {
    if fmt.name != model.model_format.name {
        return None;
    }
    if let (Some(fv), Some(mv)) = (&fmt.version, &model.model_format.version) {
        if fv != mv {
            return None;
        }
    }

    let mut score = 1;

    if let Some(arch) = &fmt.model_architecture {
        if model.model_architecture.as_ref() != Some(arch) {
            return None;
        }
        score = score.max(5);
    }
    if let Some(fw) = &fmt.model_framework {
        let Some(mfw) = &model.model_framework else {
            return None;
        };
        if fw.name != mfw.name {
            return None;
        }
        if let (Some(fv), Some(mv)) = (&fw.version, &mfw.version) {
            if fv != mv {
                return None;
            }
        }
        score = score.max(4);
    }
    if let Some(mf) = &fmt.model_format {
        if mf.name != model.model_format.name {
            return None;
        }
        if let (Some(fv), Some(mv)) = (&mf.version, &model.model_format.version) {
            if fv != mv {
                return None;
            }
        }
        score = score.max(3);
    }
    if let Some(q) = &fmt.quantization {
        if model.quantization.as_ref() != Some(q) {
            return None;
        }
        score = score.max(2);
    }

    Some(score)
}

/// The best-scoring format of a runtime for a model, or `None` when nothing
/// matches. When `require_auto_select` is set (the auto-selection path), only
/// `autoSelect=true` entries are considered.
pub fn best_format(
    spec: &RuntimeSpec,
    model: &ModelSpec,
    require_auto_select: bool,
) -> Option<(u8, i32, SupportedModelFormat)> {
    spec.supported_model_formats
        .iter()
        .filter(|f| !require_auto_select || f.auto_select == Some(true))
        .filter_map(|f| format_match_score(f, model).map(|s| (s, f.priority.unwrap_or(0), f.clone())))
        .max_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)))
}

/// Merge namespaced and cluster candidate lists; namespaced entries shadow
/// cluster entries of the same name.
pub fn shadow_cluster_candidates(
    namespaced: Vec<RuntimeCandidate>,
    cluster: Vec<RuntimeCandidate>,
) -> Vec<RuntimeCandidate> {
    let mut out = namespaced;
    for c in cluster {
        if !out.iter().any(|n| n.name == c.name) {
            out.push(c);
        }
    }
    out
}

/// Pick the single winner among candidates: highest format score, then highest
/// priority, then lexicographic name for determinism.
pub fn select_from_candidates(
    candidates: Vec<RuntimeCandidate>,
    model: &ModelSpec,
) -> Option<ResolvedRuntime> {
    let mut matches: Vec<(u8, i32, RuntimeCandidate, SupportedModelFormat)> = candidates
        .into_iter()
        .filter(|c| !c.spec.disabled)
        .filter(|c| size_in_range(&c.spec, model))
        .filter_map(|c| {
            best_format(&c.spec, model, true).map(|(score, prio, fmt)| (score, prio, c, fmt))
        })
        .collect();
    matches.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(b.1.cmp(&a.1))
            .then(a.2.name.cmp(&b.2.name))
    });
    matches.into_iter().next().map(|(_, _, c, fmt)| ResolvedRuntime {
        name: c.name,
        cluster_scoped: c.cluster_scoped,
        spec: c.spec,
        format: fmt,
    })
}

/// Look up a runtime by name; namespaced first, then cluster-scoped.
pub async fn get_runtime(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<Option<RuntimeCandidate>> {
    let namespaced: Api<ServingRuntime> = Api::namespaced(client.clone(), namespace);
    if let Some(rt) = namespaced.get_opt(name).await? {
        return Ok(Some(RuntimeCandidate {
            name: rt.name_any(),
            cluster_scoped: false,
            spec: rt.spec.runtime,
        }));
    }
    let cluster: Api<ClusterServingRuntime> = Api::all(client.clone());
    Ok(cluster.get_opt(name).await?.map(|rt| RuntimeCandidate {
        name: rt.name_any(),
        cluster_scoped: true,
        spec: rt.spec.runtime,
    }))
}

async fn list_candidates(client: &Client, namespace: &str) -> Result<Vec<RuntimeCandidate>> {
    let lp = ListParams::default();
    let namespaced: Api<ServingRuntime> = Api::namespaced(client.clone(), namespace);
    let ns_items = namespaced
        .list(&lp)
        .await?
        .items
        .into_iter()
        .map(|rt| RuntimeCandidate {
            name: rt.name_any(),
            cluster_scoped: false,
            spec: rt.spec.runtime,
        })
        .collect();
    let cluster: Api<ClusterServingRuntime> = Api::all(client.clone());
    let cl_items = cluster
        .list(&lp)
        .await?
        .items
        .into_iter()
        .map(|rt| RuntimeCandidate {
            name: rt.name_any(),
            cluster_scoped: true,
            spec: rt.spec.runtime,
        })
        .collect();
    Ok(shadow_cluster_candidates(ns_items, cl_items))
}

/// Validate an explicitly referenced runtime against the model.
pub async fn validate_runtime(
    client: &Client,
    runtime_name: &str,
    model_name: &str,
    model: &ModelSpec,
    isvc: &InferenceService,
) -> Result<ResolvedRuntime> {
    let namespace = isvc.namespace().unwrap_or_default();
    let incompatible = |reason: &str| Error::RuntimeIncompatible {
        runtime: runtime_name.to_string(),
        model: model_name.to_string(),
        reason: reason.to_string(),
    };

    let candidate = get_runtime(client, runtime_name, &namespace)
        .await?
        .ok_or_else(|| incompatible("runtime not found"))?;
    if candidate.spec.disabled {
        return Err(incompatible("runtime is disabled"));
    }
    if !size_in_range(&candidate.spec, model) {
        return Err(incompatible("model size is outside the runtime's size range"));
    }
    let Some((_, _, fmt)) = best_format(&candidate.spec, model, false) else {
        return Err(incompatible("no supported model format matches the model"));
    };
    Ok(ResolvedRuntime {
        name: candidate.name,
        cluster_scoped: candidate.cluster_scoped,
        spec: candidate.spec,
        format: fmt,
    })
}

/// Auto-select a runtime for the model among all enabled runtimes.
pub async fn select_runtime(
    client: &Client,
    model_name: &str,
    model: &ModelSpec,
    isvc: &InferenceService,
) -> Result<ResolvedRuntime> {
    let namespace = isvc.namespace().unwrap_or_default();
    let candidates = list_candidates(client, &namespace).await?;
    select_from_candidates(candidates, model)
        .ok_or_else(|| Error::RuntimeNotFound(model_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ModelFormat, ModelFramework, ModelSizeRange};
    use rstest::rstest;

    fn model(format: &str) -> ModelSpec {
        ModelSpec {
            model_format: ModelFormat {
                name: format.into(),
                version: None,
            },
            ..Default::default()
        }
    }

    fn auto_format(name: &str) -> SupportedModelFormat {
        SupportedModelFormat {
            name: name.into(),
            auto_select: Some(true),
            ..Default::default()
        }
    }

    fn candidate(name: &str, spec: RuntimeSpec) -> RuntimeCandidate {
        RuntimeCandidate {
            name: name.into(),
            cluster_scoped: false,
            spec,
        }
    }

    #[rstest]
    #[case("7B", Some(7e9))]
    #[case("350M", Some(3.5e8))]
    #[case("100m", Some(1e8))]
    #[case("1.5B", Some(1.5e9))]
    #[case("2T", Some(2e12))]
    #[case("512K", Some(5.12e5))]
    #[case("123", Some(123.0))]
    #[case("", None)]
    #[case("b7", None)]
    fn parameter_sizes_parse(#[case] input: &str, #[case] expected: Option<f64>) {
        assert_eq!(parse_parameter_size(input), expected);
    }

    #[test]
    fn size_range_excludes_out_of_bounds_models() {
        let spec = RuntimeSpec {
            model_size_range: Some(ModelSizeRange {
                min: Some("1B".into()),
                max: Some("13B".into()),
            }),
            ..Default::default()
        };
        let mut m = model("safetensors");
        m.model_parameter_size = Some("7B".into());
        assert!(size_in_range(&spec, &m));
        m.model_parameter_size = Some("70B".into());
        assert!(!size_in_range(&spec, &m));
        m.model_parameter_size = Some("350M".into());
        assert!(!size_in_range(&spec, &m));
        m.model_parameter_size = None;
        assert!(size_in_range(&spec, &m));
    }

    #[test]
    fn family_name_mismatch_never_matches() {
        let fmt = auto_format("onnx");
        assert_eq!(format_match_score(&fmt, &model("safetensors")), None);
    }

    #[test]
    fn architecture_match_outranks_everything() {
        let mut m = model("safetensors");
        m.model_architecture = Some("LlamaForCausalLM".into());
        m.quantization = Some("awq".into());

        let mut arch = auto_format("safetensors");
        arch.model_architecture = Some("LlamaForCausalLM".into());
        let mut quant = auto_format("safetensors");
        quant.quantization = Some("awq".into());

        assert_eq!(format_match_score(&arch, &m), Some(5));
        assert_eq!(format_match_score(&quant, &m), Some(2));
    }

    #[test]
    fn declared_attributes_must_agree() {
        let mut m = model("safetensors");
        m.model_architecture = Some("LlamaForCausalLM".into());
        let mut fmt = auto_format("safetensors");
        fmt.model_architecture = Some("MistralForCausalLM".into());
        assert_eq!(format_match_score(&fmt, &m), None);
    }

    #[test]
    fn framework_version_mismatch_rejects() {
        let mut m = model("safetensors");
        m.model_framework = Some(ModelFramework {
            name: "transformers".into(),
            version: Some("4.40".into()),
        });
        let mut fmt = auto_format("safetensors");
        fmt.model_framework = Some(ModelFramework {
            name: "transformers".into(),
            version: Some("3.0".into()),
        });
        assert_eq!(format_match_score(&fmt, &m), None);
        fmt.model_framework.as_mut().unwrap().version = Some("4.40".into());
        assert_eq!(format_match_score(&fmt, &m), Some(4));
    }

    #[test]
    fn selection_prefers_specificity_over_priority() {
        let mut m = model("safetensors");
        m.model_architecture = Some("LlamaForCausalLM".into());

        let mut arch_fmt = auto_format("safetensors");
        arch_fmt.model_architecture = Some("LlamaForCausalLM".into());
        arch_fmt.priority = Some(1);
        let mut plain_fmt = auto_format("safetensors");
        plain_fmt.priority = Some(100);

        let winner = select_from_candidates(
            vec![
                candidate(
                    "generic",
                    RuntimeSpec {
                        supported_model_formats: vec![plain_fmt],
                        ..Default::default()
                    },
                ),
                candidate(
                    "llama-tuned",
                    RuntimeSpec {
                        supported_model_formats: vec![arch_fmt],
                        ..Default::default()
                    },
                ),
            ],
            &m,
        )
        .unwrap();
        assert_eq!(winner.name, "llama-tuned");
    }

    #[test]
    fn equal_scores_break_ties_by_priority_then_name() {
        let m = model("safetensors");
        let mut low = auto_format("safetensors");
        low.priority = Some(1);
        let mut high = auto_format("safetensors");
        high.priority = Some(2);

        let winner = select_from_candidates(
            vec![
                candidate(
                    "zeta",
                    RuntimeSpec {
                        supported_model_formats: vec![high.clone()],
                        ..Default::default()
                    },
                ),
                candidate(
                    "alpha",
                    RuntimeSpec {
                        supported_model_formats: vec![low],
                        ..Default::default()
                    },
                ),
            ],
            &m,
        )
        .unwrap();
        assert_eq!(winner.name, "zeta");

        let winner = select_from_candidates(
            vec![
                candidate(
                    "zeta",
                    RuntimeSpec {
                        supported_model_formats: vec![high.clone()],
                        ..Default::default()
                    },
                ),
                candidate(
                    "alpha",
                    RuntimeSpec {
                        supported_model_formats: vec![high],
                        ..Default::default()
                    },
                ),
            ],
            &m,
        )
        .unwrap();
        assert_eq!(winner.name, "alpha");
    }

    #[test]
    fn disabled_runtimes_and_non_auto_select_formats_are_skipped() {
        let m = model("safetensors");
        let mut manual = auto_format("safetensors");
        manual.auto_select = Some(false);

        assert!(
            select_from_candidates(
                vec![
                    candidate(
                        "disabled",
                        RuntimeSpec {
                            supported_model_formats: vec![auto_format("safetensors")],
                            disabled: true,
                            ..Default::default()
                        },
                    ),
                    candidate(
                        "manual-only",
                        RuntimeSpec {
                            supported_model_formats: vec![manual],
                            ..Default::default()
                        },
                    ),
                ],
                &m,
            )
            .is_none()
        );
    }

    #[test]
    fn namespaced_candidates_shadow_cluster_candidates() {
        let merged = shadow_cluster_candidates(
            vec![candidate("shared", RuntimeSpec::default())],
            vec![
                RuntimeCandidate {
                    name: "shared".into(),
                    cluster_scoped: true,
                    spec: RuntimeSpec {
                        disabled: true,
                        ..Default::default()
                    },
                },
                RuntimeCandidate {
                    name: "cluster-only".into(),
                    cluster_scoped: true,
                    spec: RuntimeSpec::default(),
                },
            ],
        );
        assert_eq!(merged.len(), 2);
        let shared = merged.iter().find(|c| c.name == "shared").unwrap();
        assert!(!shared.cluster_scoped);
        assert!(!shared.spec.disabled);
    }
}
