use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 带权重的短语分级（按顺序匹配，先命中者生效）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhraseTier {
    pub label: String,
    pub weight: f64,
    pub phrases: Vec<String>,
}

/// 方法学创新子因子
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InnovationLexicon {
    pub novel_method: Vec<String>,
    pub ai_ml: Vec<String>,
    pub data_release: Vec<String>,
    pub tooling: Vec<String>,
    pub reproducibility: Vec<String>,
    pub multimodal: Vec<String>,
}

/// 三级研究方法学列表
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MethodologyTiers {
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

/// 评分用的全部短语表，作为不可变数据注入评分器
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Lexicon {
    pub study_types: Vec<PhraseTier>,
    pub high_impact: Vec<String>,
    pub moderate_impact: Vec<String>,
    pub low_impact: Vec<String>,
    pub large_sample: Vec<String>,
    pub small_sample: Vec<String>,
    pub clinical_timeline: Vec<PhraseTier>,
    pub innovation: InnovationLexicon,
    pub legacy_novelty: Vec<String>,
    pub legacy_ai: Vec<String>,
    pub relevant_categories: Vec<String>,
    pub methodologies: MethodologyTiers,
}

impl Lexicon {
    /// 加载短语表；未指定路径时使用内置默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("读取短语表失败: {}", path.display()))?;
        let lexicon: Lexicon = toml::from_str(&content)
            .with_context(|| format!("解析短语表失败: {}", path.display()))?;
        Ok(lexicon)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn tier(label: &str, weight: f64, phrases: &[&str]) -> PhraseTier {
    PhraseTier {
        label: label.to_string(),
        weight,
        phrases: strings(phrases),
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            study_types: vec![
                tier(
                    "randomized controlled trial",
                    2.0,
                    &["randomized controlled trial", "randomised controlled trial", "rct", "clinical trial"],
                ),
                tier("meta-analysis", 1.8, &["meta-analysis", "meta analysis", "systematic review"]),
                tier(
                    "multi-center / phase III",
                    1.5,
                    &["multi-center", "multicenter", "multicentre", "phase iii", "phase 3"],
                ),
                tier("prospective cohort", 1.0, &["prospective", "cohort"]),
                tier("retrospective / case-control", 0.5, &["retrospective", "case-control"]),
                tier("case report", -1.5, &["case report", "case series", "single case"]),
                tier("preclinical", -1.0, &["in vitro", "cell culture", "animal model"]),
            ],
            high_impact: strings(&[
                "breakthrough", "novel", "innovative", "first", "groundbreaking", "revolutionary",
                "significant", "substantial", "major", "landmark", "paradigm", "transformative",
                "clinical trial", "randomized controlled trial", "rct", "meta-analysis",
                "systematic review", "multi-center", "multicenter", "phase iii", "phase 3",
                "fda approved", "fda approval", "regulatory approval", "clinical guidelines",
                "treatment outcome", "patient outcome", "mortality reduction", "survival",
                "efficacy", "effectiveness", "safety profile", "adverse events",
            ]),
            moderate_impact: strings(&[
                "improvement", "enhancement", "optimization", "validation", "evaluation",
                "assessment", "comparison", "analysis", "investigation", "study",
                "pilot study", "feasibility", "preliminary", "observational",
                "retrospective", "prospective", "cohort", "case-control",
                "diagnostic", "predictive", "prognostic", "biomarker", "screening",
            ]),
            low_impact: strings(&[
                "case report", "case series", "single case", "letter", "editorial",
                "commentary", "review", "survey", "opinion", "hypothesis",
                "theoretical", "conceptual", "in vitro", "cell culture", "animal model",
                "preliminary findings", "limited sample", "small cohort",
            ]),
            large_sample: strings(&["large cohort", "large sample", "n >"]),
            small_sample: strings(&["small sample", "limited sample", "pilot"]),
            clinical_timeline: vec![
                tier(
                    "regulatory approval / guidelines",
                    3.0,
                    &[
                        "fda approval", "fda approved", "fda-approved", "regulatory approval",
                        "clinical guidelines", "treatment guidelines", "practice guidelines",
                    ],
                ),
                tier(
                    "late-stage clinical trial",
                    2.0,
                    &["phase ii", "phase iii", "phase 2", "phase 3", "clinical trial"],
                ),
                tier(
                    "clinical outcomes",
                    1.0,
                    &["outcome", "survival", "efficacy", "mortality", "effectiveness"],
                ),
                tier(
                    "diagnostics / biomarkers",
                    0.5,
                    &["biomarker", "diagnostic", "screening", "prognostic"],
                ),
            ],
            innovation: InnovationLexicon {
                novel_method: strings(&[
                    "novel algorithm", "new algorithm", "new method", "novel method", "novel approach",
                ]),
                ai_ml: strings(&[
                    "machine learning", "deep learning", "artificial intelligence",
                    "neural network", "large language model",
                ]),
                data_release: strings(&[
                    "new dataset", "novel dataset", "open source", "open-source", "github",
                    "publicly available",
                ]),
                tooling: strings(&["tool", "framework", "software", "platform", "pipeline"]),
                reproducibility: strings(&[
                    "reproducible", "reproducibility", "cross-validation", "external validation",
                ]),
                multimodal: strings(&["multimodal", "multi-modal", "hybrid", "fusion"]),
            },
            legacy_novelty: strings(&["novel", "innovative", "first", "breakthrough"]),
            legacy_ai: strings(&["artificial intelligence", "machine learning", "deep learning"]),
            relevant_categories: strings(&["q-bio", "stat.ML", "cs.AI", "cs.LG", "cs.CV", "cs.CL"]),
            methodologies: default_methodologies(),
        }
    }
}

fn default_methodologies() -> MethodologyTiers {
    MethodologyTiers {
        high: strings(&[
            "Randomized Controlled Trial (RCT)",
            "Double-blind Randomized Controlled Trial",
            "Triple-blind Randomized Controlled Trial",
            "Cluster Randomized Controlled Trial",
            "Crossover Randomized Controlled Trial",
            "Adaptive Randomized Trial",
            "Pragmatic Clinical Trial",
            "Phase III Clinical Trial",
            "Phase IV Post-marketing Surveillance",
            "Multi-center Clinical Trial",
            "International Multi-center Trial",
            "Systematic Review with Meta-analysis",
            "Network Meta-analysis",
            "Individual Patient Data Meta-analysis",
            "Cochrane Systematic Review",
            "Living Systematic Review",
            "Umbrella Review",
            "Scoping Review with Meta-analysis",
            "Bayesian Randomized Controlled Trial",
            "Mendelian Randomization",
            "Propensity Score Matching",
            "Instrumental Variable Analysis",
            "Regression Discontinuity Design",
            "Difference-in-Differences Analysis",
            "Interrupted Time Series Analysis",
            "Causal Inference Methods",
            "Genome-Wide Association Study (GWAS)",
            "Whole Genome Sequencing",
            "Whole Exome Sequencing",
            "Pharmacogenomics Study",
            "Polygenic Risk Score Analysis",
            "Multi-omics Integration",
            "Single-cell RNA Sequencing",
            "Spatial Transcriptomics",
            "Deep Learning for Medical Imaging",
            "Federated Learning in Healthcare",
            "Explainable AI in Clinical Decision Making",
            "Large Language Models for Medical Tasks",
            "Computer Vision for Pathology",
            "Reinforcement Learning for Treatment Optimization",
            "Transfer Learning in Medical AI",
            "Multi-modal AI for Healthcare",
            "FDA Breakthrough Therapy Designation",
            "Real-World Evidence (RWE) Study",
            "Comparative Effectiveness Research",
            "Health Technology Assessment",
            "Implementation Science Study",
        ]),
        medium: strings(&[
            "Prospective Cohort Study",
            "Retrospective Cohort Study",
            "Case-Control Study",
            "Nested Case-Control Study",
            "Cross-sectional Study",
            "Longitudinal Study",
            "Population-based Study",
            "Registry-based Study",
            "Electronic Health Record (EHR) Study",
            "Phase I Clinical Trial",
            "Phase II Clinical Trial",
            "Dose-escalation Study",
            "Pilot Clinical Trial",
            "Feasibility Study",
            "Proof-of-Concept Study",
            "First-in-Human Study",
            "Diagnostic Accuracy Study",
            "Biomarker Validation Study",
            "Screening Study",
            "Predictive Model Development",
            "Prognostic Model Validation",
            "Risk Stratification Study",
            "In Vivo Animal Study",
            "Preclinical Study",
            "Translational Research",
            "Mechanistic Study",
            "Pharmacokinetic/Pharmacodynamic Study",
            "Mixed Methods Study",
            "Qualitative Study",
            "Machine Learning for Risk Prediction",
            "Natural Language Processing for Clinical Notes",
            "Computer-Aided Diagnosis",
            "Radiomics Analysis",
            "Predictive Modeling",
            "Time Series Analysis for Healthcare",
            "Survival Analysis with ML",
            "Proteomics Study",
            "Metabolomics Study",
            "Microbiome Analysis",
            "Epigenetic Study",
            "Flow Cytometry Analysis",
            "Pharmacovigilance Study",
            "Health Economic Evaluation",
            "Quality of Life Assessment",
            "Patient-Reported Outcome Measures (PROMs)",
            "Cost-effectiveness Analysis",
            "Markov Modeling",
        ]),
        low: strings(&[
            "Case Report",
            "Case Series",
            "Single Case Study",
            "Case-based Review",
            "In Vitro Study",
            "Cell Culture Study",
            "Biochemical Assay",
            "Western Blot Analysis",
            "PCR Analysis",
            "ELISA",
            "Immunohistochemistry",
            "Histological Analysis",
            "Mouse Model Study",
            "Rat Model Study",
            "Cell Line Study",
            "Xenograft Model",
            "Organoid Study",
            "Descriptive Study",
            "Ecological Study",
            "Correlation Study",
            "Prevalence Study",
            "Literature Review",
            "Narrative Review",
            "Editorial",
            "Commentary",
            "Opinion Piece",
            "Perspective Article",
            "Letter to Editor",
            "Short Communication",
            "Descriptive Statistics",
            "Simple Linear Regression",
            "Chi-square Test",
            "T-test Analysis",
            "Theoretical Model",
            "Conceptual Framework",
            "Hypothesis Generation",
            "Simulation Study",
            "Convenience Sample Survey",
            "Online Survey",
            "Questionnaire Study",
            "Interview Study",
            "Focus Group Study",
            "Radiological Case Series",
            "Pilot Study (Small N)",
            "Preliminary Results",
            "Feasibility Assessment",
            "Method Development",
            "Protocol Development",
            "Validation Study (Small Scale)",
        ]),
    }
}
