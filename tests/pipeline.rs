use std::sync::{Arc, Mutex};

use fdx::documents::DocumentSet;
use fdx::features::{ExtractionRequest, ExtractionState, ExtractionStatus, FeatureExtractor};
use fdx::ground_truth::GroundTruth;
use fdx::progress::{ExtractionEvent, ExtractionProgressReporter};
use fdx::registry::ModelRegistry;
use fdx::{Pipeline, PipelineError};
use fdx_core::classify::CategorizationMethod;
use fdx_core::cluster::{ClusteringMethod, NOISE};
use fdx_core::dupdet::{DupMethod, DupQuery};
use fdx_core::{DatasetId, ModelKind};
use tempfile::TempDir;

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn vocabulary_request() -> ExtractionRequest {
    ExtractionRequest {
        use_hashing: false,
        ..ExtractionRequest::default()
    }
}

fn hashing_request(n_features: usize) -> ExtractionRequest {
    ExtractionRequest {
        use_hashing: true,
        n_features: Some(n_features),
        ..ExtractionRequest::default()
    }
}

/// Two fruit exemplars, two rocket exemplars, and one unlabeled fruit
/// document, in that order.
fn fruit_and_rockets() -> DocumentSet {
    DocumentSet::inline([
        ("r1.txt", "apple apple banana"),
        ("r2.txt", "apple banana banana"),
        ("n1.txt", "rocket engine rocket"),
        ("n2.txt", "rocket engine engine"),
        ("d.txt", "apple banana fruit"),
    ])
    .with_ground_truth(GroundTruth {
        ids: strings(&["r1.txt", "r2.txt", "n1.txt", "n2.txt", "d.txt"]),
        labels: vec![true, true, false, false, true],
    })
}

fn extracted(pipeline: &Pipeline, docs: &DocumentSet, request: &ExtractionRequest) -> DatasetId {
    let dsid = pipeline.features.preprocess(docs, request).unwrap();
    pipeline.features.run(&dsid).unwrap();
    dsid
}

fn setup() -> (TempDir, Pipeline) {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::open(tmp.path().join("cache")).unwrap();
    (tmp, pipeline)
}

// ---- feature extraction -----------------------------------------------------

struct StatusRecorder {
    extractor: FeatureExtractor,
    seen: Mutex<Vec<ExtractionStatus>>,
}

impl ExtractionProgressReporter for StatusRecorder {
    fn report(&self, event: ExtractionEvent) {
        if let ExtractionEvent::Chunk { dsid, .. } = event {
            let status = self.extractor.status(&dsid).unwrap();
            self.seen.lock().unwrap().push(status);
        }
    }
}

#[test]
fn chunked_extraction_reports_processed_documents() {
    let tmp = TempDir::new().unwrap();
    let registry = ModelRegistry::open(tmp.path().join("cache")).unwrap();
    let recorder = Arc::new(StatusRecorder {
        extractor: FeatureExtractor::new(registry.clone()),
        seen: Mutex::new(Vec::new()),
    });
    let extractor = FeatureExtractor::new(registry)
        .with_progress(recorder.clone() as Arc<dyn ExtractionProgressReporter>);

    let docs = DocumentSet::inline(
        (0..10).map(|i| (format!("doc{i:02}.txt"), format!("document number {i} words"))),
    );
    let request = ExtractionRequest {
        chunk_size: 4,
        ..hashing_request(1024)
    };
    let dsid = extractor.preprocess(&docs, &request).unwrap();

    let before = extractor.status(&dsid).unwrap();
    assert_eq!(before.state, ExtractionState::InProgress);
    assert_eq!(before.processed, 0);
    assert_eq!(before.total, 10);

    extractor.run(&dsid).unwrap();

    let seen = recorder.seen.lock().unwrap().clone();
    let processed: Vec<usize> = seen.iter().map(|s| s.processed).collect();
    assert_eq!(processed, vec![4, 8, 10]);
    assert!(seen.iter().all(|s| s.state == ExtractionState::InProgress));
    assert!(seen.iter().all(|s| s.total == 10));

    let after = extractor.status(&dsid).unwrap();
    assert_eq!(after.state, ExtractionState::Finished);
    assert_eq!(after.processed, 10);
}

#[test]
fn finished_extraction_stays_finished() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    pipeline.features.run(&dsid).unwrap();
    assert_eq!(
        pipeline.features.status(&dsid).unwrap().state,
        ExtractionState::Finished
    );
}

#[test]
fn finalize_is_idempotent_and_preserves_features() {
    let (_tmp, pipeline) = setup();
    let request = ExtractionRequest {
        chunk_size: 2,
        ..vocabulary_request()
    };
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &request);
    let before = pipeline.features.load(&dsid).unwrap();

    assert_eq!(pipeline.features.finalize(&dsid).unwrap(), dsid);
    assert_eq!(pipeline.features.finalize(&dsid).unwrap(), dsid);

    let after = pipeline.features.load(&dsid).unwrap();
    assert_eq!(after.matrix, before.matrix);
    assert_eq!(
        pipeline.features.status(&dsid).unwrap().state,
        ExtractionState::Finished
    );
}

#[test]
fn hashing_parameters_have_no_max_df() {
    let (_tmp, pipeline) = setup();
    let request = ExtractionRequest {
        max_df: Some(50.0),
        ..hashing_request(256)
    };
    let dsid = pipeline
        .features
        .preprocess(&fruit_and_rockets(), &request)
        .unwrap();
    let params = pipeline.features.get_params(&dsid).unwrap();
    let json = serde_json::to_value(&params).unwrap();
    assert!(json.get("max_df").is_none());
    assert!(json.get("min_df").is_none());
    assert_eq!(json["filenames"].as_array().unwrap().len(), 5);
    assert_eq!(json["n_samples"], 5);
}

#[test]
fn invalid_request_writes_nothing() {
    let (_tmp, pipeline) = setup();
    let request = ExtractionRequest {
        norm: "l3".to_string(),
        ..ExtractionRequest::default()
    };
    let err = pipeline
        .features
        .preprocess(&fruit_and_rockets(), &request)
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    assert!(pipeline.features.list().unwrap().is_empty());
}

#[test]
fn failed_extraction_is_reported_by_status() {
    let tmp = TempDir::new().unwrap();
    let doc = tmp.path().join("vanishing.txt");
    std::fs::write(&doc, "here today").unwrap();
    let pipeline = Pipeline::open(tmp.path().join("cache")).unwrap();

    let dsid = pipeline
        .features
        .preprocess(&DocumentSet::from_paths(&[doc.clone()]), &hashing_request(64))
        .unwrap();
    std::fs::remove_file(&doc).unwrap();

    assert!(matches!(
        pipeline.features.run(&dsid),
        Err(PipelineError::ProcessingFailure { .. })
    ));
    assert!(matches!(
        pipeline.features.status(&dsid),
        Err(PipelineError::ProcessingFailure { .. })
    ));
    // failures are not retried
    assert!(pipeline.features.run(&dsid).is_err());
}

#[test]
fn unfinished_dataset_cannot_be_loaded() {
    let (_tmp, pipeline) = setup();
    let dsid = pipeline
        .features
        .preprocess(&fruit_and_rockets(), &vocabulary_request())
        .unwrap();
    assert!(matches!(
        pipeline.features.load(&dsid),
        Err(PipelineError::ProcessingFailure { .. })
    ));
    assert!(pipeline.lsi.train(&dsid, 2).is_err());
}

#[tokio::test]
async fn background_extraction_can_be_polled() {
    let (_tmp, pipeline) = setup();
    let dsid = pipeline
        .features
        .preprocess(&fruit_and_rockets(), &hashing_request(512))
        .unwrap();
    pipeline.features.spawn(dsid.clone()).await.unwrap().unwrap();
    let status = pipeline.features.status(&dsid).unwrap();
    assert_eq!(status.state, ExtractionState::Finished);
    assert_eq!(status.processed, 5);
}

// ---- lsi --------------------------------------------------------------------

#[test]
fn nearest_neighbor_relevance_on_five_documents() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let trained = pipeline.lsi.train(&dsid, 2).unwrap();
    assert!((0.0..=1.0).contains(&trained.explained_variance));

    let rel = strings(&["r1.txt", "r2.txt"]);
    let nrel = strings(&["n1.txt", "n2.txt"]);
    let pred = pipeline
        .lsi
        .classify_by_relevance(&trained.mid, &rel, &nrel)
        .unwrap();

    assert_eq!(pred.filenames.len(), 5);
    assert_eq!(pred.prediction, vec![true, true, false, false, true]);
    assert!(pred.nearest_rel.iter().all(|i| *i < 2));
    assert!(pred.nearest_nrel.iter().all(|i| (2..4).contains(i)));
    assert!(pred.distance_rel[4] < pred.distance_nrel[4]);
    for (p, s) in pred.prediction.iter().zip(pred.scores.iter()) {
        assert_eq!(*p, *s > 0.5);
    }
    assert_eq!(pred.training_scores.recall, Some(1.0));
    assert_eq!(pred.training_scores.precision, Some(1.0));
    assert_eq!(pred.training_scores.f1, Some(1.0));
    assert_eq!(pred.training_scores.average_precision, Some(1.0));

    // deterministic
    let again = pipeline
        .lsi
        .classify_by_relevance(&trained.mid, &rel, &nrel)
        .unwrap();
    assert_eq!(again, pred);

    let gt = fruit_and_rockets().ground_truth.unwrap();
    let scores = pipeline.lsi.test(&trained.mid, &rel, &nrel, &gt).unwrap();
    assert_eq!(scores.recall, Some(1.0));
    assert_eq!(scores.auc_roc, Some(1.0));
}

#[test]
fn relevance_rejects_unknown_and_overlapping_exemplars() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let mid = pipeline.lsi.train(&dsid, 2).unwrap().mid;

    let unknown = pipeline
        .lsi
        .classify_by_relevance(&mid, &strings(&["nope.txt"]), &strings(&["n1.txt"]));
    assert!(matches!(unknown, Err(PipelineError::InvalidConfiguration(_))));

    let overlap = pipeline.lsi.classify_by_relevance(
        &mid,
        &strings(&["r1.txt", "n1.txt"]),
        &strings(&["n1.txt"]),
    );
    assert!(matches!(overlap, Err(PipelineError::InvalidConfiguration(_))));
}

#[test]
fn lsi_params_and_listing() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let mid = pipeline.lsi.train(&dsid, 50).unwrap().mid;
    let manifest = pipeline.lsi.get_params(&mid).unwrap();
    assert_eq!(manifest.dataset_id, dsid);
    assert_eq!(manifest.params.n_components_requested, 50);
    assert!(manifest.params.n_components <= 5);
    assert_eq!(pipeline.lsi.list(&dsid).unwrap().len(), 1);
}

// ---- categorization ---------------------------------------------------------

#[test]
fn categorization_train_predict_and_test() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let rel = strings(&["r1.txt", "r2.txt"]);
    let nrel = strings(&["n1.txt", "n2.txt"]);

    for method in [
        CategorizationMethod::LogisticRegression,
        CategorizationMethod::NearestCentroid,
        CategorizationMethod::NearestNeighbor,
    ] {
        let trained = pipeline
            .categorizer
            .train(&dsid, &rel, &nrel, method, false, true)
            .unwrap();
        assert_eq!(trained.training_ids, strings(&["r1.txt", "r2.txt", "n1.txt", "n2.txt"]));
        assert_eq!(trained.training_labels, vec![true, true, false, false]);
        assert_eq!(trained.scores.recall, Some(1.0), "{method}");
        assert_eq!(trained.scores.precision, Some(1.0), "{method}");

        let pred = pipeline.categorizer.predict(&trained.mid).unwrap();
        assert_eq!(pred.scores.len(), 5);
        assert!(pred.scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(pred.scores[0] > 0.5 && pred.scores[1] > 0.5, "{method}");
        assert!(pred.scores[2] < 0.5 && pred.scores[3] < 0.5, "{method}");
        assert!(pred.scores[4] > 0.5, "{method}");

        // falls back to the ground truth stored with the dataset
        let scores = pipeline.categorizer.test(&trained.mid, None).unwrap();
        assert_eq!(scores.recall, Some(1.0));
    }
    assert_eq!(pipeline.categorizer.list(&dsid).unwrap().len(), 3);
}

#[test]
fn categorization_without_training_scores_has_no_metrics() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let trained = pipeline
        .categorizer
        .train(
            &dsid,
            &strings(&["r1.txt", "r2.txt"]),
            &strings(&["n1.txt", "n2.txt"]),
            CategorizationMethod::LogisticRegression,
            true,
            false,
        )
        .unwrap();
    assert_eq!(trained.scores.recall, None);
    assert_eq!(trained.scores.auc_roc, None);
    let params = pipeline.categorizer.get_params(&trained.mid).unwrap().params;
    assert!(params.cross_validate);
    assert!(params.c.is_some());
    assert_eq!(params.relevant_filenames, strings(&["r1.txt", "r2.txt"]));
}

// ---- clustering -------------------------------------------------------------

#[test]
fn hierarchical_clustering_has_a_leaf_per_document() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());

    for method in [
        ClusteringMethod::WardHierarchical {
            n_clusters: 2,
            n_neighbors: 5,
        },
        ClusteringMethod::Birch {
            n_clusters: 2,
            threshold: 0.5,
        },
    ] {
        let mid = pipeline.clusterer.fit(&dsid, &method, None).unwrap();
        let model = pipeline.clusterer.load(&mid).unwrap();
        let tree = pipeline.clusterer.get_tree(&model).expect("tree");
        assert_eq!(tree.n_leaves(), 5);

        let l = &model.labels;
        assert_eq!(l[0], l[1]);
        assert_eq!(l[0], l[4]);
        assert_eq!(l[2], l[3]);
        assert_ne!(l[0], l[2]);

        let report = pipeline.clusterer.report(&mid, 2).unwrap();
        assert_eq!(report.n_clusters, 2);
        assert!(!report.lsi);
        assert_eq!(report.tree.as_ref().map(Vec::len), Some(4));
        let terms = report.cluster_terms.expect("vocabulary dataset has terms");
        let rocket_cluster = &terms[l[2] as usize];
        assert!(rocket_cluster.contains(&"rocket".to_string()));
        assert!(rocket_cluster.contains(&"engine".to_string()));
    }
}

#[test]
fn flat_clustering_has_no_tree() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let mid = pipeline
        .clusterer
        .fit(&dsid, &ClusteringMethod::KMeans { n_clusters: 2 }, None)
        .unwrap();
    let model = pipeline.clusterer.load(&mid).unwrap();
    assert!(pipeline.clusterer.get_tree(&model).is_none());
    assert_eq!(model.labels.len(), 5);
}

#[test]
fn dbscan_with_large_min_samples_is_all_noise() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let mid = pipeline
        .clusterer
        .fit(
            &dsid,
            &ClusteringMethod::Dbscan {
                eps: 0.5,
                min_samples: 6,
            },
            None,
        )
        .unwrap();
    let model = pipeline.clusterer.load(&mid).unwrap();
    assert!(model.labels.iter().all(|l| *l == NOISE));
    assert!(pipeline.clusterer.get_tree(&model).is_none());
}

#[test]
fn clustering_on_lsi_projection() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let lsi_mid = pipeline.lsi.train(&dsid, 2).unwrap().mid;
    let mid = pipeline
        .clusterer
        .fit(&dsid, &ClusteringMethod::KMeans { n_clusters: 2 }, Some(&lsi_mid))
        .unwrap();
    let report = pipeline.clusterer.report(&mid, 3).unwrap();
    assert!(report.lsi);
    assert_eq!(report.params.lsi_mid, Some(lsi_mid));

    // a projection from another dataset is rejected
    let other = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let err = pipeline
        .clusterer
        .fit(&other, &ClusteringMethod::KMeans { n_clusters: 2 }, report.params.lsi_mid.as_ref())
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
}

#[test]
fn cluster_terms_need_a_vocabulary() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &hashing_request(256));
    let mid = pipeline
        .clusterer
        .fit(&dsid, &ClusteringMethod::KMeans { n_clusters: 2 }, None)
        .unwrap();
    let model = pipeline.clusterer.load(&mid).unwrap();
    assert!(matches!(
        pipeline.clusterer.compute_labels(&model, 3),
        Err(PipelineError::InvalidConfiguration(_))
    ));
    assert!(pipeline.clusterer.report(&mid, 3).unwrap().cluster_terms.is_none());
}

#[test]
fn zero_top_words_skips_cluster_terms() {
    let (_tmp, pipeline) = setup();
    for request in [vocabulary_request(), hashing_request(256)] {
        let dsid = extracted(&pipeline, &fruit_and_rockets(), &request);
        let mid = pipeline
            .clusterer
            .fit(&dsid, &ClusteringMethod::KMeans { n_clusters: 2 }, None)
            .unwrap();
        let model = pipeline.clusterer.load(&mid).unwrap();

        let terms = pipeline.clusterer.compute_labels(&model, 0).unwrap();
        assert!(terms.is_empty(), "use_hashing={}", request.use_hashing);

        let report = pipeline.clusterer.report(&mid, 0).unwrap();
        assert_eq!(report.cluster_terms, Some(Vec::new()));
        assert_eq!(report.labels.len(), 5);
    }
}

// ---- duplicate detection ----------------------------------------------------

#[test]
fn duplicate_detection_groups_identical_documents() {
    let (_tmp, pipeline) = setup();
    let docs = DocumentSet::inline([
        ("a.txt", "the quick brown fox jumps over the lazy dog"),
        ("b.txt", "the quick brown fox jumps over the lazy dog"),
        ("c.txt", "completely unrelated invoice about quarterly revenue figures"),
    ]);
    let dsid = extracted(&pipeline, &docs, &vocabulary_request());

    let simhash = pipeline.dupdet.fit(&dsid, DupMethod::SimHash).unwrap();
    let res = pipeline.dupdet.query(&simhash, &DupQuery::default()).unwrap();
    assert_eq!(res.cluster_id, vec![0, 0, 1]);
    let hashes = res.simhash.expect("simhash fingerprints");
    assert!(hashes.iter().all(|h| h.len() == 16));
    assert_eq!(hashes[0], hashes[1]);

    let imatch = pipeline.dupdet.fit(&dsid, DupMethod::IMatch).unwrap();
    let res = pipeline.dupdet.query(&imatch, &DupQuery::default()).unwrap();
    assert_eq!(res.cluster_id, vec![0, 0, 1]);
    assert!(res.simhash.is_none());

    assert_eq!(pipeline.dupdet.list(&dsid).unwrap().len(), 2);
}

// ---- lifecycle --------------------------------------------------------------

#[test]
fn delete_then_resolve_is_not_found() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let mid = pipeline.lsi.train(&dsid, 2).unwrap().mid;

    assert!(pipeline.lsi.delete(&mid).unwrap());
    assert!(!pipeline.lsi.delete(&mid).unwrap());
    assert!(pipeline.lsi.get_params(&mid).unwrap_err().is_not_found());

    assert!(pipeline.features.delete(&dsid).unwrap());
    assert!(!pipeline.features.delete(&dsid).unwrap());
    assert!(pipeline.features.status(&dsid).unwrap_err().is_not_found());
}

#[test]
fn orphaned_model_reports_missing_dataset() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let mid = pipeline
        .clusterer
        .fit(&dsid, &ClusteringMethod::KMeans { n_clusters: 2 }, None)
        .unwrap();
    pipeline.features.delete(&dsid).unwrap();

    match pipeline.clusterer.report(&mid, 3) {
        Err(PipelineError::NotFound { kind, id }) => {
            assert_eq!(kind, "dataset");
            assert_eq!(id, dsid.to_string());
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    // the model is still listed until deleted explicitly
    let all = pipeline.list_models(None, Some(ModelKind::Clustering)).unwrap();
    assert_eq!(all.len(), 1);
    assert!(pipeline.clusterer.delete(&mid).unwrap());
}

#[test]
fn model_ids_are_unique_across_kinds() {
    let (_tmp, pipeline) = setup();
    let dsid = extracted(&pipeline, &fruit_and_rockets(), &vocabulary_request());
    let a = pipeline.lsi.train(&dsid, 2).unwrap().mid;
    let b = pipeline.lsi.train(&dsid, 2).unwrap().mid;
    let c = pipeline.dupdet.fit(&dsid, DupMethod::SimHash).unwrap();
    assert_ne!(a, b);
    assert_ne!(a, c);
    // a model of another kind does not resolve
    assert!(pipeline.lsi.get_params(&c).unwrap_err().is_not_found());
    assert_eq!(pipeline.list_models(Some(&dsid), None).unwrap().len(), 3);
}
